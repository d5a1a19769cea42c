//! Network listeners.
use std::{io, net::SocketAddr};

use snafu::{ResultExt as _, Snafu};
use tokio::net::{TcpListener, TcpStream};

use super::addr::ListenAddress;

/// A listener error.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum ListenerError {
    /// Failed to bind to the listen address.
    #[snafu(display("failed to bind to listen address {}: {}", address, source))]
    FailedToBind {
        /// Listen address.
        address: ListenAddress,

        /// Source of the error.
        source: io::Error,
    },

    /// Failed to configure a setting on an accepted stream.
    #[snafu(display("failed to configure {} for stream from {}: {}", setting, peer_addr, source))]
    FailedToConfigureStream {
        /// Name of the setting.
        setting: &'static str,

        /// Remote address of the stream.
        peer_addr: SocketAddr,

        /// Source of the error.
        source: io::Error,
    },

    /// Failed to accept a new stream from the listener.
    #[snafu(display("failed to accept new stream for listener on address {}: {}", address, source))]
    FailedToAccept {
        /// Listen address.
        address: ListenAddress,

        /// Source of the error.
        source: io::Error,
    },
}

/// A TCP listener.
///
/// When bound to port zero, the OS picks the port, and [`listen_address`][Self::listen_address] reports the address
/// that was actually bound.
pub struct Listener {
    listen_address: ListenAddress,
    inner: TcpListener,
}

impl Listener {
    /// Creates a new `Listener` bound to the given listen address.
    ///
    /// ## Errors
    ///
    /// If the listen address cannot be bound, an error is returned.
    pub async fn from_listen_address(listen_address: ListenAddress) -> Result<Self, ListenerError> {
        let inner = TcpListener::bind(listen_address.socket_addr())
            .await
            .context(FailedToBind {
                address: listen_address.clone(),
            })?;

        let bound_address = inner.local_addr().context(FailedToBind {
            address: listen_address.clone(),
        })?;

        Ok(Self {
            listen_address: bound_address.into(),
            inner,
        })
    }

    /// Gets a reference to the bound listen address.
    pub fn listen_address(&self) -> &ListenAddress {
        &self.listen_address
    }

    /// Accepts a new stream from the listener.
    ///
    /// Accepted streams have `TCP_NODELAY` enabled.
    ///
    /// ## Errors
    ///
    /// If the listener fails to accept a new stream, or the stream cannot be configured, an error is returned.
    pub async fn accept(&mut self) -> Result<(TcpStream, SocketAddr), ListenerError> {
        let (stream, peer_addr) = self.inner.accept().await.context(FailedToAccept {
            address: self.listen_address.clone(),
        })?;

        stream.set_nodelay(true).context(FailedToConfigureStream {
            setting: "TCP_NODELAY",
            peer_addr,
        })?;

        Ok((stream, peer_addr))
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};

    use super::*;

    #[tokio::test]
    async fn binds_ephemeral_port_and_accepts() {
        let mut listener = Listener::from_listen_address(ListenAddress::try_from("127.0.0.1:0").unwrap())
            .await
            .unwrap();
        let connect_addr = listener.listen_address().as_local_connect_addr();
        assert_ne!(connect_addr.port(), 0);

        let client = tokio::spawn(async move {
            let mut stream = TcpStream::connect(connect_addr).await.unwrap();
            stream.write_all(b"hello").await.unwrap();
        });

        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = String::new();
        stream.read_to_string(&mut buf).await.unwrap();
        assert_eq!(buf, "hello");

        client.await.unwrap();
    }

    #[tokio::test]
    async fn bind_conflict() {
        let first = Listener::from_listen_address(ListenAddress::try_from("127.0.0.1:0").unwrap())
            .await
            .unwrap();

        let result = Listener::from_listen_address(first.listen_address().clone()).await;
        assert!(matches!(result, Err(ListenerError::FailedToBind { .. })));
    }
}
