//! Listening sockets.
//!
//! A [`Server`] waits for read-readiness on its listener with the same watch
//! machinery as any stream, then accepts without blocking. A [`ServerPool`]
//! waits on several servers at once through one merged watch.

use std::fmt;
use std::io;
use std::net::TcpListener;
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixListener;

use tracing::{debug, trace};

use super::Socket;
use crate::info::SocketAddress;
use crate::stream::{Handle, Stream};
use crate::watch::{AsSource, Source, Watch, WatchError};

/// An error that can occur when binding or accepting.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ServerError {
    /// The listener could not be bound.
    #[error("failed to bind {address}: {source}")]
    Bind {
        /// The address which was being bound.
        address: String,

        /// The underlying failure.
        #[source]
        source: io::Error,
    },

    /// Accept Error
    #[error("accept error: {0}")]
    Accept(#[source] io::Error),

    /// Waiting for a pending connection failed.
    #[error(transparent)]
    Watch(#[from] WatchError),

    /// IO Errors
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ServerError {
    pub(crate) fn bind<A: fmt::Display>(address: A, source: io::Error) -> Self {
        let address = address.to_string();
        debug!(%address, "bind error: {}", source);
        Self::Bind { address, source }
    }

    fn accept(error: io::Error) -> Self {
        debug!("accept error: {}", error);
        Self::Accept(error)
    }
}

/// A bound listening socket.
#[derive(Debug)]
pub enum Listener {
    /// A TCP listener.
    Tcp(TcpListener),

    /// A Unix domain socket listener.
    Unix(UnixListener),
}

impl Listener {
    /// Identity of this listener.
    pub fn handle(&self) -> Handle {
        Handle::from(self)
    }

    /// The address this listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddress> {
        match self {
            Listener::Tcp(listener) => listener.local_addr().map(SocketAddress::from),
            Listener::Unix(listener) => listener.local_addr().map(SocketAddress::unix),
        }
    }

    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        match self {
            Listener::Tcp(listener) => listener.set_nonblocking(nonblocking),
            Listener::Unix(listener) => listener.set_nonblocking(nonblocking),
        }
    }

    /// Accept one pending connection. Accepted streams are blocking.
    fn accept(&self) -> io::Result<Stream> {
        match self {
            Listener::Tcp(listener) => {
                let (stream, _) = listener.accept()?;
                stream.set_nonblocking(false)?;
                Ok(Stream::from_tcp(stream))
            }
            Listener::Unix(listener) => {
                let (stream, _) = listener.accept()?;
                stream.set_nonblocking(false)?;
                Ok(Stream::from_unix(stream))
            }
        }
    }
}

impl AsRawFd for Listener {
    fn as_raw_fd(&self) -> RawFd {
        match self {
            Listener::Tcp(listener) => listener.as_raw_fd(),
            Listener::Unix(listener) => listener.as_raw_fd(),
        }
    }
}

impl From<TcpListener> for Listener {
    fn from(listener: TcpListener) -> Self {
        Listener::Tcp(listener)
    }
}

impl From<UnixListener> for Listener {
    fn from(listener: UnixListener) -> Self {
        Listener::Unix(listener)
    }
}

/// A source of new connections.
pub trait Accept {
    /// The connection type for this acceptor
    type Connection;

    /// The error type for this acceptor
    type Error;

    /// Wait for one connection. `Ok(None)` means the watch timed out with
    /// nothing pending.
    fn accept(&mut self) -> Result<Option<Self::Connection>, Self::Error>;
}

/// Extension trait for Accept
pub trait AcceptExt: Accept {
    /// Connections accepted one after another.
    ///
    /// The iterator ends once a wait times out with nothing pending, or after
    /// the first error.
    fn incoming(&mut self) -> Incoming<'_, Self> {
        Incoming {
            acceptor: self,
            done: false,
        }
    }
}

impl<A> AcceptExt for A where A: Accept + ?Sized {}

/// Iterator over accepted connections. See [`AcceptExt::incoming`].
#[derive(Debug)]
pub struct Incoming<'a, A: ?Sized> {
    acceptor: &'a mut A,
    done: bool,
}

impl<A: Accept + ?Sized> Iterator for Incoming<'_, A> {
    type Item = Result<A::Connection, A::Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match self.acceptor.accept() {
            Ok(Some(connection)) => Some(Ok(connection)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(error) => {
                self.done = true;
                Some(Err(error))
            }
        }
    }
}

/// A listening socket which accepts [`Socket`]s.
///
/// Accepted sockets share the server's template watch.
#[derive(Debug)]
pub struct Server<W> {
    listener: Listener,
    watch: W,
}

impl<W: Watch> Server<W> {
    /// Serve connections from `listener`, waiting with `watch`.
    pub fn new(listener: Listener, watch: W) -> Result<Self, ServerError> {
        listener.set_nonblocking(true)?;
        Ok(Self { listener, watch })
    }

    /// Identity of the listening socket.
    pub fn handle(&self) -> Handle {
        self.listener.handle()
    }

    /// The address this server listens on.
    pub fn local_addr(&self) -> io::Result<SocketAddress> {
        self.listener.local_addr()
    }

    /// The template watch.
    pub fn watch(&self) -> &W {
        &self.watch
    }

    /// Release the listener.
    pub fn into_listener(self) -> Listener {
        self.listener
    }

    /// Accept without waiting. Another process may have taken the connection
    /// between readiness and accept, which is not an error.
    fn try_accept(&self) -> Result<Option<Socket<W>>, ServerError> {
        match self.listener.accept() {
            Ok(stream) => {
                debug!(server = %self.handle(), handle = %stream.handle(), "accepted connection");
                Ok(Some(Socket::new(stream, self.watch.clone())))
            }
            Err(error) if error.kind() == io::ErrorKind::WouldBlock => {
                trace!(server = %self.handle(), "connection vanished before accept");
                Ok(None)
            }
            Err(error) => Err(ServerError::accept(error)),
        }
    }
}

impl<W: Watch> Accept for Server<W> {
    type Connection = Socket<W>;
    type Error = ServerError;

    fn accept(&mut self) -> Result<Option<Socket<W>>, ServerError> {
        let ready = self.watch.clone().clear().for_read([&*self]).invoke()?;
        if !ready.is_readable(self.handle()) {
            trace!(server = %self.handle(), "no pending connection");
            return Ok(None);
        }
        self.try_accept()
    }
}

impl<W> AsSource for Server<W> {
    fn source(&self) -> Source {
        Source::Server(self.listener.handle())
    }
}

/// Several servers accepting through one merged watch.
#[derive(Debug)]
pub struct ServerPool<K, W> {
    watch: W,
    servers: Vec<(K, Server<W>)>,
}

impl<K: Clone, W: Watch> ServerPool<K, W> {
    /// An empty pool waiting with `watch`.
    pub fn new(watch: W) -> Self {
        Self {
            watch,
            servers: Vec::new(),
        }
    }

    /// Add a server, identified by `id`.
    pub fn with(mut self, id: K, server: Server<W>) -> Self {
        self.servers.push((id, server));
        self
    }

    /// Number of servers in the pool.
    pub fn len(&self) -> usize {
        self.servers.len()
    }

    /// Whether the pool has no servers.
    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}

impl<K: Clone, W: Watch> Accept for ServerPool<K, W> {
    type Connection = (K, Socket<W>);
    type Error = ServerError;

    /// Accept from whichever server first has a pending connection.
    fn accept(&mut self) -> Result<Option<(K, Socket<W>)>, ServerError> {
        let ready = self
            .watch
            .clone()
            .clear()
            .for_read(self.servers.iter().map(|(_, server)| server))
            .invoke()?;

        for (id, server) in &self.servers {
            if !ready.is_readable(server.handle()) {
                continue;
            }
            if let Some(socket) = server.try_accept()? {
                return Ok(Some((id.clone(), socket)));
            }
        }

        trace!(servers = self.servers.len(), "no pending connection in pool");
        Ok(None)
    }
}
