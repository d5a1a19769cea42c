use std::{path::Path, time::Duration};

use cinder_components::{
    forwarders::carbon::{CarbonForwarder, CarbonForwarderConfiguration},
    sources::carbon::{CarbonListener, CarbonListenerConfiguration},
};
use cinder_config::{ConfigurationLoader, GenericConfiguration};
use cinder_error::{ErrorContext as _, GenericError};
use tokio::{select, signal::ctrl_c, time::interval};
use tracing::{error, info};

const DEFAULT_STATS_INTERVAL_SECS: u64 = 60;

/// Loads the relay configuration.
///
/// The YAML file at `path` is optional. Environment variables prefixed with `CINDER_` take precedence over it.
pub fn load_configuration(path: &Path) -> Result<GenericConfiguration, GenericError> {
    let loader = ConfigurationLoader::default()
        .try_from_yaml(path)
        .from_environment("CINDER")
        .error_context("Failed to read configuration from environment.")?;

    Ok(loader.into_generic())
}

/// Runs the relay until interrupted.
pub async fn run(config: GenericConfiguration) -> Result<(), GenericError> {
    let forwarder_config = CarbonForwarderConfiguration::from_configuration(&config)
        .error_context("Failed to load forwarder configuration.")?;
    let listener_config = CarbonListenerConfiguration::from_configuration(&config)
        .error_context("Failed to load listener configuration.")?;
    let stats_interval_secs = config
        .try_get_typed("stats_interval_secs")?
        .unwrap_or(DEFAULT_STATS_INTERVAL_SECS);

    let forwarder = CarbonForwarder::from_configuration(&forwarder_config)
        .await
        .with_error_context(|| format!("Failed to create forwarder for '{}'.", forwarder_config.address()))?;
    info!(
        name = forwarder.name(),
        backend = %forwarder.remote_address(),
        "Carbon forwarder ready."
    );

    let listener = CarbonListener::from_configuration(&listener_config, forwarder.inbound())
        .await
        .error_context("Failed to start Carbon listener.")?;
    info!(listen_address = %listener.local_addr(), "Carbon relay started.");

    let mut stats_ticker = interval(Duration::from_secs(stats_interval_secs.max(1)));
    stats_ticker.tick().await;

    loop {
        select! {
            result = ctrl_c() => {
                if let Err(e) = result {
                    error!(error = %e, "Failed to listen for shutdown signal. Shutting down.");
                }
                break;
            }
            _ = stats_ticker.tick(), if stats_interval_secs > 0 => {
                info!(forwarder = %forwarder.stats(), listener = %listener.stats(), "Relay statistics.");
            }
        }
    }

    info!("Received shutdown signal. Stopping Carbon relay...");

    let listener_stats = listener.shutdown().await;
    let forwarder_stats = forwarder.shutdown().await;
    info!(forwarder = %forwarder_stats, listener = %listener_stats, "Final relay statistics.");

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use super::*;

    #[test]
    fn missing_file_is_tolerated() {
        let config = load_configuration(Path::new("/nonexistent/cinder.yaml")).unwrap();
        let forward_to = CarbonForwarderConfiguration::from_configuration(&config);
        assert!(forward_to.is_err());
    }

    #[test]
    fn reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "listen_address: tcp://127.0.0.1:0\nforward_to:\n  host: 127.0.0.1\n  port: 2003\n  name: primary"
        )
        .unwrap();

        let config = load_configuration(file.path()).unwrap();
        let forward_to = CarbonForwarderConfiguration::from_configuration(&config).unwrap();
        assert_eq!(forward_to.address(), "127.0.0.1:2003");
        assert!(CarbonListenerConfiguration::from_configuration(&config).is_ok());
    }
}
