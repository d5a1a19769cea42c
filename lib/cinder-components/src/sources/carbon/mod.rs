//! Carbon source.
//!
//! Accepts TCP connections speaking the Carbon plaintext protocol, and decodes each line into a datapoint.
use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicU64, Ordering::Relaxed},
        Arc,
    },
    time::Duration,
};

use cinder_config::{ConfigurationError, GenericConfiguration};
use cinder_event::Datapoint;
use cinder_io::{
    codec::carbon::{parse_line, CarbonParseError},
    net::{ListenAddress, Listener, ListenerError},
};
use futures::StreamExt as _;
use serde::Deserialize;
use tokio::{
    net::TcpStream,
    select,
    sync::{mpsc, oneshot},
    task::{JoinHandle, JoinSet},
    time::sleep,
};
use tokio_util::codec::FramedRead;
use tracing::{debug, error, info, info_span, warn, Instrument as _};

use crate::Stats;

mod framing;
use self::framing::{Frame, LineFraming};

/// Pause after a failed accept, so persistent failures such as descriptor exhaustion don't spin the accept loop.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

const fn default_listen_address() -> ListenAddress {
    ListenAddress::any_tcp(2003)
}

const fn default_max_line_length() -> usize {
    4096
}

/// Carbon listener configuration.
#[derive(Clone, Debug, Deserialize)]
pub struct CarbonListenerConfiguration {
    /// The address to listen on.
    ///
    /// Port zero lets the operating system pick a free port.
    ///
    /// Defaults to `tcp://0.0.0.0:2003`.
    #[serde(default = "default_listen_address")]
    listen_address: ListenAddress,

    /// Maximum length of a single line, in bytes.
    ///
    /// Longer lines are discarded and counted as invalid.
    ///
    /// Defaults to 4096.
    #[serde(default = "default_max_line_length")]
    max_line_length: usize,
}

impl CarbonListenerConfiguration {
    /// Creates a new `CarbonListenerConfiguration` for the given listen address.
    pub fn from_listen_address(listen_address: ListenAddress) -> Self {
        Self {
            listen_address,
            max_line_length: default_max_line_length(),
        }
    }

    /// Reads the listener configuration from the given configuration.
    ///
    /// # Errors
    ///
    /// If any setting is invalid, an error is returned.
    pub fn from_configuration(config: &GenericConfiguration) -> Result<Self, ConfigurationError> {
        config.as_typed()
    }

    /// Sets the maximum line length.
    pub fn with_max_line_length(mut self, max_line_length: usize) -> Self {
        self.max_line_length = max_line_length;
        self
    }
}

#[derive(Default)]
struct ListenerStats {
    connections_accepted: AtomicU64,
    lines_received: AtomicU64,
    invalid_lines: AtomicU64,
}

impl ListenerStats {
    fn snapshot(&self) -> Stats {
        Stats::from_counters(vec![
            ("connections_accepted", self.connections_accepted.load(Relaxed)),
            ("lines_received", self.lines_received.load(Relaxed)),
            ("invalid_lines", self.invalid_lines.load(Relaxed)),
        ])
    }
}

/// Carbon listener.
///
/// Decoded datapoints are sent to the sink handed to the listener at creation. Sending waits when the sink is full, so
/// a slow consumer eventually stops the listener from reading off its sockets.
pub struct CarbonListener {
    local_addr: SocketAddr,
    stats: Arc<ListenerStats>,
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl CarbonListener {
    /// Creates a new `CarbonListener` from the given configuration, and starts accepting connections.
    ///
    /// # Errors
    ///
    /// If the listen address cannot be bound, an error is returned.
    pub async fn from_configuration(
        config: &CarbonListenerConfiguration, sink: mpsc::Sender<Datapoint>,
    ) -> Result<Self, ListenerError> {
        let listener = Listener::from_listen_address(config.listen_address.clone()).await?;
        let local_addr = listener.listen_address().as_local_connect_addr();
        let stats = Arc::new(ListenerStats::default());
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let span = info_span!("carbon_listener", listen_address = %listener.listen_address());
        let task = tokio::spawn(
            run_listener(listener, sink, Arc::clone(&stats), config.max_line_length, shutdown_rx).instrument(span),
        );

        Ok(Self {
            local_addr,
            stats,
            shutdown_tx,
            task,
        })
    }

    /// Returns an address that local clients can connect to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns a snapshot of the listener's counters.
    pub fn stats(&self) -> Stats {
        self.stats.snapshot()
    }

    /// Shuts down the listener.
    ///
    /// Stops accepting new connections, and closes all existing ones.
    pub async fn shutdown(self) -> Stats {
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.task.await {
            error!(error = %e, "Carbon listener task failed.");
        }

        self.stats.snapshot()
    }
}

async fn run_listener(
    mut listener: Listener, sink: mpsc::Sender<Datapoint>, stats: Arc<ListenerStats>, max_line_length: usize,
    mut shutdown: oneshot::Receiver<()>,
) {
    info!("Carbon listener started.");

    let mut connections = JoinSet::new();

    loop {
        select! {
            _ = &mut shutdown => break,
            result = listener.accept() => match result {
                Ok((stream, peer_addr)) => {
                    stats.connections_accepted.fetch_add(1, Relaxed);
                    debug!(%peer_addr, "Accepted connection.");

                    let sink = sink.clone();
                    let stats = Arc::clone(&stats);
                    connections.spawn(
                        process_stream(stream, sink, stats, max_line_length)
                            .instrument(info_span!("carbon_connection", %peer_addr)),
                    );
                }
                Err(e) => backoff_after_accept_error(&e).await,
            },
            // Reap finished connection tasks so the set doesn't grow without bound.
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }

    connections.shutdown().await;
    info!("Carbon listener stopped.");
}

async fn backoff_after_accept_error(error: &ListenerError) {
    warn!(%error, "Failed to accept connection.");
    sleep(ACCEPT_ERROR_BACKOFF).await;
}

async fn process_stream(
    stream: TcpStream, sink: mpsc::Sender<Datapoint>, stats: Arc<ListenerStats>, max_line_length: usize,
) {
    let mut frames = FramedRead::new(stream, LineFraming::new(max_line_length));

    while let Some(frame) = frames.next().await {
        let line = match frame {
            Ok(Frame::Line(line)) => line,
            Ok(Frame::Oversized) => {
                stats.invalid_lines.fetch_add(1, Relaxed);
                debug!(max_line_length, "Discarded line exceeding maximum length.");
                continue;
            }
            Err(e) => {
                debug!(error = %e, "Failed to read from connection.");
                break;
            }
        };

        match parse_line(&line) {
            Ok(datapoint) => {
                stats.lines_received.fetch_add(1, Relaxed);
                if sink.send(datapoint).await.is_err() {
                    debug!("Sink closed. Closing connection.");
                    break;
                }
            }
            Err(CarbonParseError::Empty) => {}
            Err(e) => {
                stats.lines_received.fetch_add(1, Relaxed);
                stats.invalid_lines.fetch_add(1, Relaxed);
                debug!(error = %e, %line, "Discarded invalid line.");
            }
        }
    }

    debug!("Connection closed.");
}
