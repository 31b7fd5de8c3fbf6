//! Explicit capabilities for opening resources.
//!
//! Everything that reaches outside the process (files, temporaries, standard
//! streams, sockets, listeners) and the clock used to time asynchronous watches
//! is reached through a [`Capabilities`] value passed in by the caller. There is
//! no global provider.
//!
//! ```rust
//! use sluice::cap::Capabilities;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let caps = Capabilities::new();
//! let mut file = caps.temporary_file(caps.sync_watch())?;
//! file.sink(["hello\n"])?;
//! # Ok(())
//! # }
//! ```

use std::fs::OpenOptions;
use std::io;
use std::net::{TcpListener, TcpStream, ToSocketAddrs};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};

pub use self::address::{Address, AddressError};
use crate::clock::{Clock, SystemClock};
use crate::file::File;
use crate::socket::{Listener, Server, ServerError, Socket};
use crate::stream::{Stream, StreamError};
use crate::watch::{AsyncWatch, Scheduler, SyncWatch, Watch};

mod address;

/// How a file is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Read an existing file.
    Read,

    /// Write a file, creating or truncating it.
    Write,

    /// Append to a file, creating it if needed.
    Append,

    /// Read and write an existing file.
    ReadWrite,

    /// Read and write a file, creating or truncating it.
    Create,
}

impl OpenMode {
    fn options(self) -> OpenOptions {
        let mut options = OpenOptions::new();
        match self {
            OpenMode::Read => options.read(true),
            OpenMode::Write => options.write(true).create(true).truncate(true),
            OpenMode::Append => options.append(true).create(true),
            OpenMode::ReadWrite => options.read(true).write(true),
            OpenMode::Create => options.read(true).write(true).create(true).truncate(true),
        };
        options
    }
}

/// Options applied to outgoing internet connections.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportOptions {
    /// Disable Nagle's algorithm.
    pub nodelay: bool,

    /// Give up connecting to each resolved address after this long.
    pub connect_timeout: Option<Duration>,
}

impl TransportOptions {
    /// Set `TCP_NODELAY` on connected sockets.
    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    /// Bound the time spent connecting to each resolved address.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }
}

/// The context object through which resources are opened.
#[derive(Debug, Clone)]
pub struct Capabilities {
    clock: Arc<dyn Clock>,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::new()
    }
}

impl Capabilities {
    /// Capabilities backed by the operating system and the system clock.
    pub fn new() -> Self {
        Self {
            clock: Arc::new(SystemClock),
        }
    }

    /// Time asynchronous watches with `clock`.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The clock handed to asynchronous watches.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// A blocking watch.
    pub fn sync_watch(&self) -> SyncWatch {
        SyncWatch::new()
    }

    /// A watch suspending through `scheduler`, timed by this context's clock.
    pub fn async_watch(&self, scheduler: Arc<dyn Scheduler>) -> AsyncWatch {
        AsyncWatch::new(scheduler).with_clock(self.clock.clone())
    }

    /// Open the file at `path`.
    pub fn open<P: AsRef<Path>>(&self, path: P, mode: OpenMode) -> Result<Stream, StreamError> {
        let path = path.as_ref();
        let file = mode
            .options()
            .open(path)
            .map_err(|error| StreamError::open(path.display(), error))?;
        trace!(path = %path.display(), ?mode, "opened file");
        Ok(Stream::from_file(file))
    }

    /// An anonymous temporary file, removed once closed.
    pub fn temporary(&self) -> Result<Stream, StreamError> {
        let file = tempfile::tempfile().map_err(|error| StreamError::open("temporary file", error))?;
        Ok(Stream::from_file(file))
    }

    /// The process's standard input.
    pub fn stdin(&self) -> Stream {
        Stream::stdin()
    }

    /// The process's standard output.
    pub fn stdout(&self) -> Stream {
        Stream::stdout()
    }

    /// The process's standard error.
    pub fn stderr(&self) -> Stream {
        Stream::stderr()
    }

    /// A connected pair of Unix domain sockets.
    pub fn pair(&self) -> Result<(Stream, Stream), StreamError> {
        let (left, right) =
            UnixStream::pair().map_err(|error| StreamError::open("socket pair", error))?;
        Ok((Stream::from_unix(left), Stream::from_unix(right)))
    }

    /// Connect to `address`.
    pub fn connect(
        &self,
        address: &Address,
        options: &TransportOptions,
    ) -> Result<Stream, StreamError> {
        let stream = match address {
            Address::Unix(path) => UnixStream::connect(path).map(Stream::from_unix),
            Address::Inet { host, port } => {
                connect_inet(host, *port, options).map(Stream::from_tcp)
            }
        }
        .map_err(|error| StreamError::open(address, error))?;

        debug!(%address, handle = %stream.handle(), "connected");
        Ok(stream)
    }

    /// Bind a listener to `address`.
    pub fn listen(&self, address: &Address) -> Result<Listener, ServerError> {
        let listener = match address {
            Address::Unix(path) => UnixListener::bind(path).map(Listener::Unix),
            Address::Inet { host, port } => {
                TcpListener::bind((host.as_str(), *port)).map(Listener::Tcp)
            }
        }
        .map_err(|error| ServerError::bind(address, error))?;

        debug!(%address, "listening");
        Ok(listener)
    }

    /// Open the file at `path` as a [`File`] façade.
    pub fn file<P, W>(&self, path: P, mode: OpenMode, watch: W) -> Result<File<W>, StreamError>
    where
        P: AsRef<Path>,
        W: Watch,
    {
        Ok(File::new(self.open(path, mode)?, watch))
    }

    /// An anonymous temporary file as a [`File`] façade.
    pub fn temporary_file<W: Watch>(&self, watch: W) -> Result<File<W>, StreamError> {
        Ok(File::new(self.temporary()?, watch))
    }

    /// Connect to `address` as a [`Socket`] façade.
    pub fn socket<W: Watch>(
        &self,
        address: &Address,
        options: &TransportOptions,
        watch: W,
    ) -> Result<Socket<W>, StreamError> {
        Ok(Socket::new(self.connect(address, options)?, watch))
    }

    /// Bind a [`Server`] to `address`.
    pub fn server<W: Watch>(&self, address: &Address, watch: W) -> Result<Server<W>, ServerError> {
        Server::new(self.listen(address)?, watch)
    }
}

fn connect_inet(host: &str, port: u16, options: &TransportOptions) -> io::Result<TcpStream> {
    let mut last = None;
    for addr in (host, port).to_socket_addrs()? {
        let attempt = match options.connect_timeout {
            Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
            None => TcpStream::connect(addr),
        };

        match attempt {
            Ok(stream) => {
                stream.set_nodelay(options.nodelay)?;
                return Ok(stream);
            }
            Err(error) => {
                trace!(%addr, "connect attempt failed: {}", error);
                last = Some(error);
            }
        }
    }

    Err(last.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, format!("{host} did not resolve"))
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Write;

    use crate::clock::ManualClock;

    #[test]
    fn open_modes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log");
        let caps = Capabilities::new();

        let mut writer = caps.open(&path, OpenMode::Write).unwrap();
        writer.write(b"one\n").unwrap();
        writer.close().unwrap();

        let mut appender = caps.open(&path, OpenMode::Append).unwrap();
        appender.write(b"two\n").unwrap();
        appender.close().unwrap();

        let mut reader = caps.open(&path, OpenMode::Read).unwrap();
        assert_eq!(reader.read(None).unwrap().unwrap(), "one\ntwo\n");
        assert!(matches!(reader.write(b"x"), Err(StreamError::Io(_))));
    }

    #[test]
    fn open_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let caps = Capabilities::new();
        let error = caps.open(dir.path().join("missing"), OpenMode::Read).unwrap_err();
        assert!(matches!(error, StreamError::Open { .. }));
        assert!(error.to_string().contains("missing"));
    }

    #[test]
    fn connect_unix_and_tcp() {
        let dir = tempfile::tempdir().unwrap();
        let caps = Capabilities::new();

        let unix = Address::unix(dir.path().join("sock"));
        let _listener = caps.listen(&unix).unwrap();
        let stream = caps.connect(&unix, &TransportOptions::default()).unwrap();
        assert!(!stream.is_seekable());

        let tcp = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let address = Address::from(tcp.local_addr().unwrap());
        let options = TransportOptions::default()
            .with_nodelay(true)
            .with_connect_timeout(Duration::from_secs(1));
        let mut stream = caps.connect(&address, &options).unwrap();
        let (mut peer, _) = tcp.accept().unwrap();
        peer.write_all(b"hi").unwrap();
        assert_eq!(stream.read(Some(2)).unwrap().unwrap(), "hi");
    }

    #[test]
    fn connect_refused() {
        let dir = tempfile::tempdir().unwrap();
        let caps = Capabilities::new();
        let error = caps
            .connect(&Address::unix(dir.path().join("nobody")), &TransportOptions::default())
            .unwrap_err();
        assert!(matches!(error, StreamError::Open { .. }));
    }

    #[test]
    fn async_watch_uses_context_clock() {
        #[derive(Debug)]
        struct Never;

        impl Scheduler for Never {
            fn suspend(
                &self,
                _: &crate::watch::SuspendedState,
            ) -> Result<crate::watch::Ready, crate::watch::WatchError> {
                Err(crate::watch::WatchError::SchedulerGone)
            }
        }

        let clock = ManualClock::new();
        let caps = Capabilities::new().with_clock(Arc::new(clock.clone()));
        let start = caps.clock().now();
        clock.advance(Duration::from_secs(3));
        assert_eq!(caps.clock().elapsed(start), Duration::from_secs(3));

        let watch = caps.async_watch(Arc::new(Never));
        assert!(watch.invoke().unwrap().is_empty());
    }

    #[test]
    fn pair_is_connected() {
        let caps = Capabilities::new();
        let (mut left, mut right) = caps.pair().unwrap();
        left.write(b"ping").unwrap();
        assert_eq!(right.read(Some(4)).unwrap().unwrap(), "ping");
    }
}
