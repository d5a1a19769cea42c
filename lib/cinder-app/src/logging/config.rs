use std::fmt;

use cinder_config::{deser::PermissiveBool, GenericConfiguration};
use cinder_error::{generic_error, ErrorContext as _, GenericError};
use serde::Deserialize;
use serde_with::serde_as;
use tracing_subscriber::{filter::LevelFilter, EnvFilter};

fn default_log_level() -> LogLevel {
    LevelFilter::INFO.into()
}

/// Logging configuration.
#[serde_as]
#[derive(Debug, Deserialize)]
pub struct LoggingConfiguration {
    /// Filtering directives, in `EnvFilter` syntax.
    ///
    /// Either a bare level (`info`, `debug`, ...) or a comma-separated list of `target=level` directives.
    ///
    /// Defaults to `info`.
    #[serde(default = "default_log_level")]
    pub log_level: LogLevel,

    /// Whether to log in JSON format.
    ///
    /// Defaults to `false`.
    #[serde_as(as = "PermissiveBool")]
    #[serde(default)]
    pub log_format_json: bool,
}

impl LoggingConfiguration {
    /// Creates a new `LoggingConfiguration` instance from the given configuration.
    ///
    /// # Errors
    ///
    /// If the configuration cannot be deserialized as `LoggingConfiguration`, an error is returned.
    pub fn from_configuration(config: &GenericConfiguration) -> Result<Self, GenericError> {
        config
            .as_typed()
            .error_context("Failed to read logging configuration.")
    }
}

impl Default for LoggingConfiguration {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format_json: false,
        }
    }
}

/// Log filtering directives.
#[derive(Debug, Deserialize)]
#[serde(try_from = "String")]
pub struct LogLevel(EnvFilter);

impl LogLevel {
    /// Returns a filter built from the directives.
    pub fn as_env_filter(&self) -> EnvFilter {
        self.0.clone()
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<LevelFilter> for LogLevel {
    fn from(level: LevelFilter) -> Self {
        Self(EnvFilter::default().add_directive(level.into()))
    }
}

impl TryFrom<String> for LogLevel {
    type Error = GenericError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.trim().is_empty() {
            return Err(generic_error!("Log level cannot be empty."));
        }

        EnvFilter::builder()
            .parse(value)
            .map(Self)
            .error_context("Failed to parse valid log level.")
    }
}

#[cfg(test)]
mod tests {
    use cinder_config::ConfigurationLoader;

    use super::*;

    fn load(yaml: &str) -> Result<LoggingConfiguration, GenericError> {
        let config = ConfigurationLoader::default().from_yaml_str(yaml)?.into_generic();
        LoggingConfiguration::from_configuration(&config)
    }

    #[test]
    fn defaults() {
        let config = load("listen_address: tcp://0.0.0.0:2003").unwrap();
        assert_eq!(config.log_level.to_string(), "info");
        assert!(!config.log_format_json);
    }

    #[test]
    fn directives_and_permissive_json_flag() {
        let config = load("log_level: \"warn,cinder_components=debug\"\nlog_format_json: \"TRUE\"").unwrap();
        assert!(config.log_format_json);

        let rendered = config.log_level.to_string();
        assert!(rendered.contains("warn"));
        assert!(rendered.contains("cinder_components=debug"));
    }

    #[test]
    fn invalid_level() {
        assert!(LogLevel::try_from(String::new()).is_err());
        assert!(LogLevel::try_from("target=notalevel".to_string()).is_err());
        assert!(load("log_level: \"\"").is_err());
    }
}
