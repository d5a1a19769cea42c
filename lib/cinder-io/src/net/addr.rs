use std::{
    borrow::Cow,
    fmt,
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4},
};

use serde::Deserialize;
use url::Url;

/// A listen address.
///
/// Carbon is only spoken over TCP, so listen addresses are TCP socket addresses. In textual form they are written as
/// URLs with the `tcp` scheme, or as a bare `host:port` pair.
///
/// ## Examples
///
/// - `tcp://0.0.0.0:2003` (listen on all IPv4 interfaces, port 2003)
/// - `tcp://[::1]:2003` (listen on IPv6 loopback, port 2003)
/// - `127.0.0.1:0` (listen on IPv4 loopback, on a port chosen by the OS)
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(try_from = "String")]
pub struct ListenAddress(SocketAddr);

impl ListenAddress {
    /// Creates an address for the given port that listens on all interfaces.
    pub const fn any_tcp(port: u16) -> Self {
        Self(SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port)))
    }

    /// Returns the socket address.
    pub const fn socket_addr(&self) -> SocketAddr {
        self.0
    }

    /// Returns an address that a local client can use to connect to this listen address.
    ///
    /// Unspecified addresses (`0.0.0.0` or `::`) are replaced with the matching loopback address. Any other address is
    /// returned as-is.
    pub fn as_local_connect_addr(&self) -> SocketAddr {
        let mut connect_addr = self.0;
        if connect_addr.ip().is_unspecified() {
            let localhost_ip = match connect_addr.is_ipv4() {
                true => IpAddr::V4(Ipv4Addr::LOCALHOST),
                false => IpAddr::V6(Ipv6Addr::LOCALHOST),
            };

            connect_addr.set_ip(localhost_ip);
        }

        connect_addr
    }
}

impl From<SocketAddr> for ListenAddress {
    fn from(addr: SocketAddr) -> Self {
        Self(addr)
    }
}

impl fmt::Display for ListenAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tcp://{}", self.0)
    }
}

impl TryFrom<String> for ListenAddress {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::try_from(value.as_str())
    }
}

impl<'a> TryFrom<&'a str> for ListenAddress {
    type Error = String;

    fn try_from(value: &'a str) -> Result<Self, Self::Error> {
        // Bare `host:port` pairs are treated as TCP addresses.
        let normalized = if value.contains("://") {
            Cow::Borrowed(value)
        } else {
            Cow::Owned(format!("tcp://{}", value))
        };
        let url = Url::parse(&normalized).map_err(|e| e.to_string())?;

        match url.scheme() {
            "tcp" => {
                if url.port().is_none() {
                    return Err("listen address must include a port".to_string());
                }

                let mut socket_addresses = url.socket_addrs(|| None).map_err(|e| e.to_string())?;
                if socket_addresses.is_empty() {
                    Err("listen address must resolve to at least one valid IP address/port pair".to_string())
                } else {
                    Ok(Self(socket_addresses.swap_remove(0)))
                }
            }
            scheme => Err(format!("unknown/unsupported address scheme '{}'", scheme)),
        }
    }
}
