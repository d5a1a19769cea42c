//! Carbon forwarder.
//!
//! Ships datapoints to a Carbon backend over a single, lazily-established TCP connection using the plaintext line
//! protocol (`<metric> <value> <timestamp>\n`).
//!
//! Datapoints are handed to the forwarder through a bounded channel, and processed one at a time, in order, by a
//! dedicated task. Delivery is best-effort: if the backend cannot be dialed, or a write fails, the datapoint is dropped
//! and counted, the broken connection is discarded, and the next datapoint dials again.
use std::{net::SocketAddr, sync::Arc, time::Duration};

use cinder_config::{ConfigurationError, GenericConfiguration};
use cinder_event::Datapoint;
use cinder_io::codec::carbon::write_line;
use serde::Deserialize;
use snafu::{ResultExt as _, Snafu};
use tokio::{
    select,
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time::Instant,
};
use tracing::{debug, error, info_span, Instrument as _};

use crate::Stats;

mod backoff;
pub use self::backoff::DialBackoff;

mod connection;
use self::connection::{write_with_deadline, ConnectionManager};
pub use self::connection::{CarbonConnection, ConnectionError, Connector, TcpConnector};

mod stats;
use self::stats::ForwarderStats;

const fn default_timeout_ms() -> u64 {
    30_000
}

const fn default_buffer_capacity() -> usize {
    10_000
}

const fn default_dial_backoff_max_ms() -> u64 {
    30_000
}

/// Converts a duration to milliseconds, rounding up so that a non-zero duration never becomes zero.
fn whole_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos().div_ceil(1_000_000)).unwrap_or(u64::MAX)
}

/// Forwarder error.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum ForwarderError {
    /// The configuration is invalid.
    #[snafu(display("invalid configuration: {}", reason))]
    InvalidConfiguration {
        /// Why the configuration was rejected.
        reason: &'static str,
    },

    /// The backend address could not be resolved.
    #[snafu(display("failed to resolve '{}': {}", address, source))]
    AddressResolution {
        /// Address being resolved.
        address: String,

        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The backend address resolved to nothing.
    #[snafu(display("'{}' did not resolve to any addresses", address))]
    NoAddresses {
        /// Address being resolved.
        address: String,
    },
}

/// Carbon forwarder configuration.
#[derive(Clone, Debug, Deserialize)]
pub struct CarbonForwarderConfiguration {
    /// Hostname or IP address of the Carbon backend.
    host: String,

    /// Port of the Carbon backend.
    port: u16,

    /// Write timeout, in milliseconds.
    ///
    /// Bounds how long a single datapoint may take to be written before it is dropped.
    ///
    /// Defaults to 30000 (30 seconds).
    #[serde(default = "default_timeout_ms")]
    timeout_ms: u64,

    /// Number of datapoints that can be queued before senders have to wait.
    ///
    /// Defaults to 10000.
    #[serde(default = "default_buffer_capacity")]
    buffer_capacity: usize,

    /// Display name of the forwarder, used in logs and telemetry.
    ///
    /// Defaults to an empty name.
    #[serde(default)]
    name: String,

    /// Dial timeout, in milliseconds.
    ///
    /// Defaults to the write timeout.
    #[serde(default)]
    dial_timeout_ms: Option<u64>,

    /// Minimum delay between dial attempts after a failed dial, in milliseconds.
    ///
    /// When set, consecutive dial failures push out the next dial attempt exponentially, and datapoints that arrive in
    /// the meantime are dropped without dialing. When zero, every datapoint dials if there is no connection.
    ///
    /// Defaults to 0 (disabled).
    #[serde(default)]
    dial_backoff_min_ms: u64,

    /// Maximum delay between dial attempts after failed dials, in milliseconds.
    ///
    /// Defaults to 30000 (30 seconds).
    #[serde(default = "default_dial_backoff_max_ms")]
    dial_backoff_max_ms: u64,
}

impl CarbonForwarderConfiguration {
    /// Creates a new `CarbonForwarderConfiguration` for the given backend, with all other settings at their defaults.
    pub fn new<H: Into<String>>(host: H, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            timeout_ms: default_timeout_ms(),
            buffer_capacity: default_buffer_capacity(),
            name: String::new(),
            dial_timeout_ms: None,
            dial_backoff_min_ms: 0,
            dial_backoff_max_ms: default_dial_backoff_max_ms(),
        }
    }

    /// Reads the forwarder configuration from the `forward_to` section of the given configuration.
    ///
    /// # Errors
    ///
    /// If the section is missing, or cannot be deserialized, an error is returned.
    pub fn from_configuration(config: &GenericConfiguration) -> Result<Self, ConfigurationError> {
        config.get_typed("forward_to")
    }

    /// Sets the write timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = whole_millis(timeout);
        self
    }

    /// Sets the buffer capacity.
    pub fn with_buffer_capacity(mut self, buffer_capacity: usize) -> Self {
        self.buffer_capacity = buffer_capacity;
        self
    }

    /// Sets the display name.
    pub fn with_name<N: Into<String>>(mut self, name: N) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the dial timeout.
    pub fn with_dial_timeout(mut self, dial_timeout: Duration) -> Self {
        self.dial_timeout_ms = Some(whole_millis(dial_timeout));
        self
    }

    /// Enables dial backoff with the given bounds.
    pub fn with_dial_backoff(mut self, min_backoff: Duration, max_backoff: Duration) -> Self {
        self.dial_backoff_min_ms = whole_millis(min_backoff);
        self.dial_backoff_max_ms = whole_millis(max_backoff);
        self
    }

    /// Returns the backend address, as `host:port`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn validate(&self) -> Result<(), ForwarderError> {
        if self.host.trim().is_empty() {
            return Err(ForwarderError::InvalidConfiguration {
                reason: "host must not be empty",
            });
        }

        if self.port == 0 {
            return Err(ForwarderError::InvalidConfiguration {
                reason: "port must be between 1 and 65535",
            });
        }

        if self.timeout_ms == 0 {
            return Err(ForwarderError::InvalidConfiguration {
                reason: "timeout must be greater than zero",
            });
        }

        if self.dial_timeout_ms == Some(0) {
            return Err(ForwarderError::InvalidConfiguration {
                reason: "dial timeout must be greater than zero",
            });
        }

        if self.buffer_capacity == 0 {
            return Err(ForwarderError::InvalidConfiguration {
                reason: "buffer capacity must be greater than zero",
            });
        }

        Ok(())
    }

    fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    fn dial_timeout(&self) -> Duration {
        self.dial_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.write_timeout())
    }

    fn dial_backoff(&self) -> Option<DialBackoff> {
        (self.dial_backoff_min_ms > 0).then(|| {
            DialBackoff::new(
                Duration::from_millis(self.dial_backoff_min_ms),
                Duration::from_millis(self.dial_backoff_max_ms),
            )
        })
    }
}

/// Carbon forwarder.
///
/// Created with a resolved backend address, but does not connect until the first datapoint arrives. Datapoints are
/// submitted through the sender returned by [`inbound`][Self::inbound].
///
/// Dropping the forwarder stops its processing task, just like [`shutdown`][Self::shutdown], but without waiting.
pub struct CarbonForwarder {
    name: String,
    remote_address: SocketAddr,
    inbound: mpsc::Sender<Datapoint>,
    stats: Arc<ForwarderStats>,
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl CarbonForwarder {
    /// Creates a new `CarbonForwarder` from the given configuration.
    ///
    /// The backend address is resolved once, here, and the first resolved address is used for every connection. The
    /// processing task is spawned on the current Tokio runtime.
    ///
    /// # Errors
    ///
    /// If the configuration is invalid, or the backend address cannot be resolved, an error is returned.
    pub async fn from_configuration(config: &CarbonForwarderConfiguration) -> Result<Self, ForwarderError> {
        config.validate()?;

        let address = config.address();
        let remote_address = tokio::net::lookup_host((config.host.as_str(), config.port))
            .await
            .context(AddressResolution {
                address: address.clone(),
            })?
            .next()
            .ok_or(ForwarderError::NoAddresses { address })?;

        Ok(Self::spawn(
            config,
            remote_address,
            Box::new(TcpConnector::new(config.dial_timeout())),
        ))
    }

    /// Creates a new `CarbonForwarder` that establishes connections through the given connector.
    ///
    /// The backend address must be an IP address, as no resolution is performed.
    ///
    /// # Errors
    ///
    /// If the configuration is invalid, or the host is not an IP address, an error is returned.
    pub fn with_connector<C>(config: &CarbonForwarderConfiguration, connector: C) -> Result<Self, ForwarderError>
    where
        C: Connector,
    {
        config.validate()?;

        let ip = config
            .host
            .parse()
            .map_err(|_| ForwarderError::InvalidConfiguration {
                reason: "host must be an IP address when using a custom connector",
            })?;

        Ok(Self::spawn(
            config,
            SocketAddr::new(ip, config.port),
            Box::new(connector),
        ))
    }

    fn spawn(config: &CarbonForwarderConfiguration, remote_address: SocketAddr, connector: Box<dyn Connector>) -> Self {
        let (inbound, inbound_rx) = mpsc::channel(config.buffer_capacity);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let stats = Arc::new(ForwarderStats::new(&config.name));

        let processor = Processor {
            connections: ConnectionManager::new(remote_address, connector, config.dial_backoff()),
            stats: Arc::clone(&stats),
            write_timeout: config.write_timeout(),
            line_buf: String::new(),
        };

        let span = info_span!("carbon_forwarder", name = %config.name, backend = %remote_address);
        let task = tokio::spawn(processor.run(inbound_rx, shutdown_rx).instrument(span));

        Self {
            name: config.name.clone(),
            remote_address,
            inbound,
            stats,
            shutdown_tx,
            task,
        }
    }

    /// Returns a sender for submitting datapoints to the forwarder.
    ///
    /// Sending waits while the forwarder's buffer is full.
    pub fn inbound(&self) -> mpsc::Sender<Datapoint> {
        self.inbound.clone()
    }

    /// Returns the display name of the forwarder.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the resolved address of the backend.
    pub fn remote_address(&self) -> SocketAddr {
        self.remote_address
    }

    /// Returns a snapshot of the forwarder's counters.
    pub fn stats(&self) -> Stats {
        self.stats.snapshot()
    }

    /// Shuts down the forwarder.
    ///
    /// The datapoint currently being processed, if any, is allowed to finish. Datapoints still queued are dropped, and
    /// the connection to the backend is closed. Returns the final counters.
    pub async fn shutdown(self) -> Stats {
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.task.await {
            error!(name = %self.name, error = %e, "Carbon forwarder task failed.");
        }

        self.stats.snapshot()
    }
}

struct Processor {
    connections: ConnectionManager,
    stats: Arc<ForwarderStats>,
    write_timeout: Duration,
    line_buf: String,
}

impl Processor {
    async fn run(mut self, mut inbound: mpsc::Receiver<Datapoint>, mut shutdown: oneshot::Receiver<()>) {
        debug!("Carbon forwarder started.");

        loop {
            select! {
                biased;

                _ = &mut shutdown => break,
                maybe_datapoint = inbound.recv() => match maybe_datapoint {
                    Some(datapoint) => self.forward(&datapoint).await,
                    None => break,
                },
            }
        }

        self.connections.invalidate();
        debug!("Carbon forwarder stopped.");
    }

    async fn forward(&mut self, datapoint: &Datapoint) {
        let address = self.connections.address();
        let connection = match self.connections.ensure_connection().await {
            Ok(connection) => connection,
            Err(e) => {
                self.stats.track_failure(&e);
                return;
            }
        };

        self.line_buf.clear();
        write_line(datapoint, &mut self.line_buf);

        let deadline = Instant::now() + self.write_timeout;
        match write_with_deadline(connection, address, self.line_buf.as_bytes(), deadline).await {
            Ok(()) => self.stats.track_forwarded(self.line_buf.len()),
            Err(e) => {
                debug!(error = %e, metric = datapoint.metric(), "Failed to write datapoint. Dropping it.");
                self.connections.invalidate();
                self.stats.track_failure(&e);
            }
        }
    }
}
