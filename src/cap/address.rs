use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;

/// Errors from parsing an [`Address`].
#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum AddressError {
    /// The address was empty.
    #[error("empty address")]
    Empty,

    /// The scheme is neither `unix` nor `tcp`.
    #[error("unknown address scheme: {0}")]
    UnknownScheme(String),

    /// A Unix address without a path.
    #[error("unix address has no path")]
    MissingPath,

    /// An internet address without a `:port` suffix.
    #[error("address {0} has no port")]
    MissingPort(String),

    /// The port is not a number in `0..=65535`.
    #[error("invalid port: {0}")]
    InvalidPort(String),

    /// An internet address without a host.
    #[error("address {0} has no host")]
    MissingHost(String),
}

/// Where a socket connects or listens.
///
/// Parsed from `unix:<path>`, `unix://<path>`, `tcp://<host>:<port>` or a bare
/// `<host>:<port>`. IPv6 hosts are written in brackets: `tcp://[::1]:80`.
///
/// ```rust
/// use sluice::cap::Address;
///
/// let address: Address = "tcp://[::1]:8080".parse().unwrap();
/// assert_eq!(address, Address::inet("::1", 8080));
/// assert_eq!(address.to_string(), "tcp://[::1]:8080");
///
/// let socket: Address = "unix:/tmp/app.sock".parse().unwrap();
/// assert_eq!(socket, Address::unix("/tmp/app.sock"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Address {
    /// A Unix domain socket path.
    Unix(PathBuf),

    /// An internet host and port. The host is a name or an IP literal.
    Inet {
        /// Host name or IP literal, without brackets.
        host: String,

        /// TCP port.
        port: u16,
    },
}

impl Address {
    /// A Unix domain socket address.
    pub fn unix<P: Into<PathBuf>>(path: P) -> Self {
        Address::Unix(path.into())
    }

    /// An internet address.
    pub fn inet<H: Into<String>>(host: H, port: u16) -> Self {
        Address::Inet {
            host: host.into(),
            port,
        }
    }

    fn parse_inet(authority: &str) -> Result<Self, AddressError> {
        let (host, port) = authority
            .rsplit_once(':')
            .ok_or_else(|| AddressError::MissingPort(authority.to_owned()))?;

        let host = match host.strip_prefix('[') {
            Some(bracketed) => bracketed
                .strip_suffix(']')
                .ok_or_else(|| AddressError::MissingHost(authority.to_owned()))?,
            None if host.contains(':') => {
                return Err(AddressError::MissingPort(authority.to_owned()));
            }
            None => host,
        };

        if host.is_empty() {
            return Err(AddressError::MissingHost(authority.to_owned()));
        }

        let port = port
            .parse()
            .map_err(|_| AddressError::InvalidPort(port.to_owned()))?;
        Ok(Address::inet(host, port))
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(AddressError::Empty);
        }

        if let Some(path) = s.strip_prefix("unix:") {
            let path = path.strip_prefix("//").unwrap_or(path);
            if path.is_empty() {
                return Err(AddressError::MissingPath);
            }
            return Ok(Address::unix(path));
        }

        match s.split_once("://") {
            Some(("tcp", authority)) => Address::parse_inet(authority),
            Some((scheme, _)) => Err(AddressError::UnknownScheme(scheme.to_owned())),
            None => Address::parse_inet(s),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Unix(path) => write!(f, "unix:{}", path.display()),
            Address::Inet { host, port } if host.contains(':') => {
                write!(f, "tcp://[{host}]:{port}")
            }
            Address::Inet { host, port } => write!(f, "tcp://{host}:{port}"),
        }
    }
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Self {
        Address::inet(addr.ip().to_string(), addr.port())
    }
}

impl From<PathBuf> for Address {
    fn from(path: PathBuf) -> Self {
        Address::Unix(path)
    }
}
