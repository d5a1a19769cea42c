use std::{io, net::SocketAddr, time::Duration};

use async_trait::async_trait;
use snafu::{ResultExt as _, Snafu};
use tokio::{
    io::AsyncWriteExt as _,
    net::TcpStream,
    time::{timeout, timeout_at, Instant},
};
use tracing::{debug, info, warn};

use super::backoff::DialBackoff;

/// Connection error.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum ConnectionError {
    /// Failed to dial the backend.
    #[snafu(display("failed to connect to {}: {}", address, source))]
    Dial {
        /// Address being dialed.
        address: SocketAddr,

        /// Underlying I/O error.
        source: io::Error,
    },

    /// Dialing the backend did not complete within the dial timeout.
    #[snafu(display("timed out connecting to {}", address))]
    DialTimeout {
        /// Address being dialed.
        address: SocketAddr,
    },

    /// Dialing was skipped because a previous failure put the connection into backoff.
    #[snafu(display("not dialing {} for another {:?} after repeated failures", address, remaining))]
    BackingOff {
        /// Address being dialed.
        address: SocketAddr,

        /// Time left until the next dial attempt is allowed.
        remaining: Duration,
    },

    /// Failed to set the write deadline on the connection.
    #[snafu(display("failed to set write deadline: {}", source))]
    SetDeadline {
        /// Underlying I/O error.
        source: io::Error,
    },

    /// Failed to write to the backend.
    #[snafu(display("failed to write to {}: {}", address, source))]
    Write {
        /// Address of the backend.
        address: SocketAddr,

        /// Underlying I/O error.
        source: io::Error,
    },

    /// The write did not complete before the write deadline.
    #[snafu(display("write to {} did not complete before the deadline", address))]
    WriteTimeout {
        /// Address of the backend.
        address: SocketAddr,
    },
}

impl ConnectionError {
    /// Returns `true` if this error happened while establishing a connection.
    pub fn is_dial_error(&self) -> bool {
        matches!(self, Self::Dial { .. } | Self::DialTimeout { .. })
    }
}

/// A live, write-only connection to a Carbon backend.
#[async_trait]
pub trait CarbonConnection: Send {
    /// Sets the instant by which the next write must complete.
    ///
    /// Implementations may also use this as an opportunity to surface errors that the connection has already observed.
    fn set_write_deadline(&mut self, deadline: Instant) -> io::Result<()>;

    /// Writes the entire buffer to the connection.
    ///
    /// Writes that run past the current write deadline fail with an error of kind [`io::ErrorKind::TimedOut`].
    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;
}

/// Establishes connections to a Carbon backend.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Dials the given address.
    ///
    /// # Errors
    ///
    /// If the connection cannot be established, an error is returned.
    async fn connect(&self, address: SocketAddr) -> Result<Box<dyn CarbonConnection>, ConnectionError>;
}

/// A [`Connector`] that dials plain TCP connections.
#[derive(Clone, Debug)]
pub struct TcpConnector {
    dial_timeout: Duration,
}

impl TcpConnector {
    /// Creates a new `TcpConnector` that gives up on dials taking longer than `dial_timeout`.
    pub fn new(dial_timeout: Duration) -> Self {
        Self { dial_timeout }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, address: SocketAddr) -> Result<Box<dyn CarbonConnection>, ConnectionError> {
        let stream = match timeout(self.dial_timeout, TcpStream::connect(address)).await {
            Ok(result) => result.context(Dial { address })?,
            Err(_) => return Err(ConnectionError::DialTimeout { address }),
        };
        stream.set_nodelay(true).context(Dial { address })?;

        Ok(Box::new(TcpConnection { stream, deadline: None }))
    }
}

struct TcpConnection {
    stream: TcpStream,
    deadline: Option<Instant>,
}

#[async_trait]
impl CarbonConnection for TcpConnection {
    fn set_write_deadline(&mut self, deadline: Instant) -> io::Result<()> {
        if deadline <= Instant::now() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "write deadline already elapsed"));
        }

        // Pick up anything the socket has been told since the last write, such as a reset from the peer.
        if let Some(e) = self.stream.take_error()? {
            return Err(e);
        }

        self.deadline = Some(deadline);
        Ok(())
    }

    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        match self.deadline {
            Some(deadline) => match timeout_at(deadline, self.stream.write_all(buf)).await {
                Ok(result) => result,
                Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "write deadline exceeded")),
            },
            None => self.stream.write_all(buf).await,
        }
    }
}

/// Sets the write deadline on `connection` and writes `line` to it.
pub(super) async fn write_with_deadline(
    connection: &mut dyn CarbonConnection, address: SocketAddr, line: &[u8], deadline: Instant,
) -> Result<(), ConnectionError> {
    connection.set_write_deadline(deadline).context(SetDeadline)?;
    connection.write_all(line).await.map_err(|source| {
        if source.kind() == io::ErrorKind::TimedOut {
            ConnectionError::WriteTimeout { address }
        } else {
            ConnectionError::Write { address, source }
        }
    })
}

/// Owns the (at most one) connection to the backend.
///
/// Connections are only ever established on demand, and are discarded as soon as they are observed to be broken.
pub(super) struct ConnectionManager {
    address: SocketAddr,
    connector: Box<dyn Connector>,
    connection: Option<Box<dyn CarbonConnection>>,
    backoff: Option<DialBackoff>,
    consecutive_failures: u32,
    next_dial_at: Option<Instant>,
}

impl ConnectionManager {
    pub fn new(address: SocketAddr, connector: Box<dyn Connector>, backoff: Option<DialBackoff>) -> Self {
        Self {
            address,
            connector,
            connection: None,
            backoff,
            consecutive_failures: 0,
            next_dial_at: None,
        }
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    #[cfg(test)]
    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Returns the live connection, dialing a new one if necessary.
    ///
    /// # Errors
    ///
    /// If there is no live connection and dialing fails, or is currently suppressed by backoff, an error is returned
    /// and the manager remains without a connection.
    pub async fn ensure_connection(&mut self) -> Result<&mut dyn CarbonConnection, ConnectionError> {
        let connection = match self.connection.take() {
            Some(connection) => connection,
            None => self.dial().await?,
        };

        Ok(&mut **self.connection.insert(connection))
    }

    /// Closes and discards the current connection, if any.
    pub fn invalidate(&mut self) {
        if self.connection.take().is_some() {
            debug!(address = %self.address, "Discarded connection to Carbon backend.");
        }
    }

    async fn dial(&mut self) -> Result<Box<dyn CarbonConnection>, ConnectionError> {
        if let Some(next_dial_at) = self.next_dial_at {
            let now = Instant::now();
            if now < next_dial_at {
                return Err(ConnectionError::BackingOff {
                    address: self.address,
                    remaining: next_dial_at - now,
                });
            }
        }

        match self.connector.connect(self.address).await {
            Ok(connection) => {
                if self.consecutive_failures > 0 {
                    info!(
                        address = %self.address,
                        failed_attempts = self.consecutive_failures,
                        "Reconnected to Carbon backend."
                    );
                } else {
                    debug!(address = %self.address, "Connected to Carbon backend.");
                }

                self.consecutive_failures = 0;
                self.next_dial_at = None;
                Ok(connection)
            }
            Err(e) => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                if self.consecutive_failures == 1 {
                    warn!(
                        error = %e,
                        "Failed to connect to Carbon backend. Dropping datapoints until a connection is established."
                    );
                } else {
                    debug!(
                        error = %e,
                        failed_attempts = self.consecutive_failures,
                        "Failed to connect to Carbon backend."
                    );
                }

                if let Some(backoff) = &self.backoff {
                    self.next_dial_at = Some(Instant::now() + backoff.get_backoff_duration(self.consecutive_failures));
                }

                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use tokio::{io::AsyncReadExt as _, net::TcpListener};

    use super::*;

    /// Counts dial attempts, and either delegates to TCP or always fails.
    struct CountingConnector {
        attempts: Arc<AtomicUsize>,
        inner: Option<TcpConnector>,
    }

    impl CountingConnector {
        fn tcp(attempts: &Arc<AtomicUsize>) -> Self {
            Self {
                attempts: Arc::clone(attempts),
                inner: Some(TcpConnector::new(Duration::from_secs(5))),
            }
        }

        fn refusing(attempts: &Arc<AtomicUsize>) -> Self {
            Self {
                attempts: Arc::clone(attempts),
                inner: None,
            }
        }
    }

    #[async_trait]
    impl Connector for CountingConnector {
        async fn connect(&self, address: SocketAddr) -> Result<Box<dyn CarbonConnection>, ConnectionError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            match &self.inner {
                Some(inner) => inner.connect(address).await,
                None => Err(ConnectionError::Dial {
                    address,
                    source: io::Error::from(io::ErrorKind::ConnectionRefused),
                }),
            }
        }
    }

    fn deadline() -> Instant {
        Instant::now() + Duration::from_secs(5)
    }

    #[tokio::test]
    async fn reuses_live_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let attempts = Arc::new(AtomicUsize::new(0));
        let mut manager = ConnectionManager::new(address, Box::new(CountingConnector::tcp(&attempts)), None);

        assert!(!manager.is_connected());
        manager.ensure_connection().await.unwrap();
        manager.ensure_connection().await.unwrap();

        assert!(manager.is_connected());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn redials_after_invalidate() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let attempts = Arc::new(AtomicUsize::new(0));
        let mut manager = ConnectionManager::new(address, Box::new(CountingConnector::tcp(&attempts)), None);

        let connection = manager.ensure_connection().await.unwrap();
        write_with_deadline(connection, address, b"first 1 1\n", deadline())
            .await
            .unwrap();
        let (mut first, _) = listener.accept().await.unwrap();

        manager.invalidate();
        assert!(!manager.is_connected());

        let connection = manager.ensure_connection().await.unwrap();
        write_with_deadline(connection, address, b"second 2 2\n", deadline())
            .await
            .unwrap();
        let (mut second, _) = listener.accept().await.unwrap();

        let mut received = String::new();
        first.read_to_string(&mut received).await.unwrap();
        assert_eq!(received, "first 1 1\n");

        manager.invalidate();
        let mut received = String::new();
        second.read_to_string(&mut received).await.unwrap();
        assert_eq!(received, "second 2 2\n");

        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn invalidate_without_connection() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let address = "127.0.0.1:1".parse().unwrap();
        let mut manager = ConnectionManager::new(address, Box::new(CountingConnector::refusing(&attempts)), None);

        manager.invalidate();
        manager.invalidate();
        assert!(!manager.is_connected());
    }

    #[tokio::test]
    async fn dial_failure_leaves_manager_unconnected() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let address = "127.0.0.1:1".parse().unwrap();
        let mut manager = ConnectionManager::new(address, Box::new(CountingConnector::refusing(&attempts)), None);

        for _ in 0..3 {
            let error = manager.ensure_connection().await.err().unwrap();
            assert!(error.is_dial_error());
        }

        // Without backoff, every attempt dials.
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert!(!manager.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_suppresses_dials() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let address = "127.0.0.1:1".parse().unwrap();
        let backoff = DialBackoff::new(Duration::from_secs(1), Duration::from_secs(60));
        let connector = Box::new(CountingConnector::refusing(&attempts));
        let mut manager = ConnectionManager::new(address, connector, Some(backoff));

        assert!(manager.ensure_connection().await.err().unwrap().is_dial_error());
        assert!(matches!(
            manager.ensure_connection().await.err().unwrap(),
            ConnectionError::BackingOff { .. }
        ));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);

        // Second failure doubles the window.
        tokio::time::advance(Duration::from_millis(1001)).await;
        assert!(manager.ensure_connection().await.err().unwrap().is_dial_error());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);

        tokio::time::advance(Duration::from_millis(1500)).await;
        assert!(matches!(
            manager.ensure_connection().await.err().unwrap(),
            ConnectionError::BackingOff { .. }
        ));

        tokio::time::advance(Duration::from_millis(501)).await;
        assert!(manager.ensure_connection().await.err().unwrap().is_dial_error());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn tcp_connector_refused() {
        // Grab a free port, then close it again so nothing is listening there.
        let address = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };

        let connector = TcpConnector::new(Duration::from_secs(5));
        match connector.connect(address).await {
            Err(ConnectionError::Dial { address: dialed, .. }) => assert_eq!(dialed, address),
            Err(e) => panic!("unexpected error: {}", e),
            Ok(_) => panic!("connected to a closed port"),
        }
    }

    #[tokio::test]
    async fn elapsed_deadline_is_rejected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let mut connection = TcpConnector::new(Duration::from_secs(5)).connect(address).await.unwrap();

        let result = write_with_deadline(connection.as_mut(), address, b"a 1 1\n", Instant::now()).await;
        assert!(matches!(result, Err(ConnectionError::SetDeadline { .. })));
    }

    #[tokio::test]
    async fn stalled_write_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let mut connection = TcpConnector::new(Duration::from_secs(5)).connect(address).await.unwrap();

        // Accept, but never read, so the socket buffers eventually fill up.
        let (_peer, _) = listener.accept().await.unwrap();

        let payload = vec![b'x'; 64 * 1024 * 1024];
        let deadline = Instant::now() + Duration::from_millis(200);
        let result = write_with_deadline(connection.as_mut(), address, &payload, deadline).await;
        assert!(matches!(result, Err(ConnectionError::WriteTimeout { .. })));
    }
}
