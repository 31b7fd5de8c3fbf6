//! Connection Information

use std::fmt;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::os::unix::net;
use std::path::PathBuf;

use crate::stream::Stream;

/// Canonicalize a socket address, converting IPv4-mapped IPv6 addresses
/// into standard IPv4 addresses.
///
/// IPv4 clients of a dual-stack listener appear as `::ffff:192.0.2.1`; this
/// reports them as `192.0.2.1`.
pub(crate) fn make_canonical(addr: SocketAddr) -> SocketAddr {
    match addr.ip() {
        IpAddr::V4(_) => addr,
        IpAddr::V6(ip) => match ip.to_ipv4_mapped() {
            Some(ip) => SocketAddr::new(IpAddr::V4(ip), addr.port()),
            None => addr,
        },
    }
}

/// The address of one end of a socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketAddress {
    /// An internet socket address.
    Tcp(SocketAddr),

    /// A Unix domain socket path. Unnamed sockets (such as either end of a
    /// socket pair) have no path.
    Unix(Option<PathBuf>),
}

impl SocketAddress {
    pub(crate) fn unix(addr: net::SocketAddr) -> Self {
        SocketAddress::Unix(addr.as_pathname().map(PathBuf::from))
    }
}

impl From<SocketAddr> for SocketAddress {
    fn from(addr: SocketAddr) -> Self {
        SocketAddress::Tcp(make_canonical(addr))
    }
}

impl fmt::Display for SocketAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SocketAddress::Tcp(addr) => write!(f, "tcp://{addr}"),
            SocketAddress::Unix(Some(path)) => write!(f, "unix:{}", path.display()),
            SocketAddress::Unix(None) => f.write_str("unix:(unnamed)"),
        }
    }
}

/// Information about a connection to a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo<Addr> {
    /// The local address for this connection.
    pub local_addr: Addr,

    /// The remote address for this connection.
    pub remote_addr: Addr,
}

impl<Addr> ConnectionInfo<Addr> {
    /// The local address for this connection
    pub fn local_addr(&self) -> &Addr {
        &self.local_addr
    }

    /// The remote address for this connection
    pub fn remote_addr(&self) -> &Addr {
        &self.remote_addr
    }

    /// Map the addresses in this connection info to a new type.
    pub fn map<T, F>(self, f: F) -> ConnectionInfo<T>
    where
        F: Fn(Addr) -> T,
    {
        ConnectionInfo {
            local_addr: f(self.local_addr),
            remote_addr: f(self.remote_addr),
        }
    }
}

/// Trait for types which can provide connection information.
pub trait HasConnectionInfo {
    /// The address type for this connection.
    type Addr: fmt::Display + fmt::Debug + Send;

    /// Get the connection information for this stream.
    ///
    /// Fails for closed streams and for streams which are not sockets.
    fn info(&self) -> io::Result<ConnectionInfo<Self::Addr>>;
}

impl HasConnectionInfo for Stream {
    type Addr = SocketAddress;

    fn info(&self) -> io::Result<ConnectionInfo<SocketAddress>> {
        let resource = self
            .resource()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "stream is closed"))?;

        if let Some(tcp) = resource.tcp() {
            return Ok(ConnectionInfo {
                local_addr: tcp.local_addr()?.into(),
                remote_addr: tcp.peer_addr()?.into(),
            });
        }

        if let Some(unix) = resource.unix() {
            return Ok(ConnectionInfo {
                local_addr: SocketAddress::unix(unix.local_addr()?),
                remote_addr: SocketAddress::unix(unix.peer_addr()?),
            });
        }

        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "stream is not a socket",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::net::{Ipv4Addr, Ipv6Addr, TcpListener, TcpStream};
    use std::os::unix::net::UnixStream;

    #[test]
    fn canonical_ipv4_mapped() {
        let mapped = SocketAddr::new(IpAddr::V6(Ipv4Addr::new(192, 0, 2, 1).to_ipv6_mapped()), 80);
        assert_eq!(make_canonical(mapped), "192.0.2.1:80".parse().unwrap());

        let v6 = SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), 80);
        assert_eq!(make_canonical(v6), v6);
    }

    #[test]
    fn tcp_info() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let stream = Stream::from_tcp(TcpStream::connect(addr).unwrap());

        let info = stream.info().unwrap();
        assert_eq!(info.remote_addr(), &SocketAddress::Tcp(addr));
        assert!(info.local_addr().to_string().starts_with("tcp://127.0.0.1:"));
    }

    #[test]
    fn unix_pair_is_unnamed() {
        let (left, _right) = UnixStream::pair().unwrap();
        let info = Stream::from_unix(left).info().unwrap();
        assert_eq!(info.local_addr, SocketAddress::Unix(None));
        assert_eq!(info.remote_addr.to_string(), "unix:(unnamed)");
    }

    #[test]
    fn files_have_no_info() {
        let stream = Stream::from_file(tempfile::tempfile().unwrap());
        assert_eq!(
            stream.info().unwrap_err().kind(),
            io::ErrorKind::Unsupported
        );
    }
}
