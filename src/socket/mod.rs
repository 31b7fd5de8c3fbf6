//! Sockets as conduits, and the servers which accept them.

use std::io;
use std::ops::{Deref, DerefMut};

use bytes::Bytes;

use crate::conduit::Conduit;
use crate::encoding::Encoding;
use crate::info::{ConnectionInfo, HasConnectionInfo, SocketAddress};
use crate::stream::Stream;
use crate::watch::Watch;

pub use self::server::{Accept, AcceptExt, Incoming, Listener, Server, ServerError, ServerPool};

mod server;

/// A [`Conduit`] over a connected socket.
///
/// Sockets are never rewindable. A socket can carry a heartbeat policy, which
/// writes keep-alive traffic to the peer while waiting for a response.
///
/// ```rust
/// use std::time::Duration;
/// use sluice::cap::Capabilities;
/// use sluice::socket::Socket;
/// use sluice::watch::{SyncWatch, Watch};
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let caps = Capabilities::new();
/// let (client, server) = caps.pair()?;
/// let watch = SyncWatch::new().timeout_after(Duration::from_secs(1));
///
/// let mut client = Socket::new(client, watch.clone());
/// let mut server = Socket::new(server, watch);
///
/// client.sink(["ping\n"])?;
/// let line = server.lines().next().unwrap()?;
/// assert_eq!(line, "ping\n");
/// # Ok(())
/// # }
/// # example().unwrap();
/// ```
#[derive(Debug)]
pub struct Socket<W> {
    conduit: Conduit<W>,
}

impl<W: Watch> Socket<W> {
    /// Wrap a connected socket stream.
    pub fn new(stream: Stream, watch: W) -> Self {
        Self {
            conduit: Conduit::new(stream, watch),
        }
    }

    /// While waiting to read, write every chunk `provider` yields to the peer,
    /// and give up once `abort` returns true.
    pub fn with_heartbeat<P, I, A>(self, provider: P, abort: A) -> Self
    where
        P: FnMut() -> I + Send + 'static,
        I: IntoIterator<Item = Bytes>,
        A: FnMut() -> bool + Send + 'static,
    {
        self.configure(|conduit| conduit.with_heartbeat(provider, abort))
    }

    /// Transcode everything read through `encoding`.
    pub fn with_encoding(self, encoding: Encoding) -> Self {
        self.configure(|conduit| conduit.with_encoding(encoding))
    }

    /// Wait for write readiness before each chunk written by a sink.
    pub fn watch_writes(self, watch_writes: bool) -> Self {
        self.configure(|conduit| conduit.watch_writes(watch_writes))
    }

    /// Close the socket once a sink finishes.
    pub fn close_after_sink(self, close: bool) -> Self {
        self.configure(|conduit| conduit.close_after_sink(close))
    }

    fn configure<F>(self, f: F) -> Self
    where
        F: FnOnce(Conduit<W>) -> Conduit<W>,
    {
        Self {
            conduit: f(self.conduit),
        }
    }

    /// Unwrap the conduit.
    pub fn into_conduit(self) -> Conduit<W> {
        self.conduit
    }
}

impl<W> HasConnectionInfo for Socket<W> {
    type Addr = SocketAddress;

    fn info(&self) -> io::Result<ConnectionInfo<SocketAddress>> {
        self.conduit.stream().info()
    }
}

impl<W> Deref for Socket<W> {
    type Target = Conduit<W>;

    fn deref(&self) -> &Self::Target {
        &self.conduit
    }
}

impl<W> DerefMut for Socket<W> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.conduit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::{Read, Write};
    use std::os::unix::net::UnixStream;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use static_assertions::assert_impl_all;

    use crate::frame::{self, FrameError, FrameExt};
    use crate::watch::SyncWatch;

    assert_impl_all!(Socket<SyncWatch>: HasConnectionInfo, Send, std::fmt::Debug);

    fn watch() -> SyncWatch {
        SyncWatch::new().timeout_after(Duration::from_millis(200))
    }

    #[test]
    fn exchange_lines() {
        crate::fixtures::subscribe();
        let (left, mut peer) = UnixStream::pair().unwrap();
        let mut socket = Socket::new(Stream::from_unix(left), watch());

        peer.write_all(b"HELLO 1\r\nBYE\r\n").unwrap();
        drop(peer);

        let lines = socket
            .lines()
            .collect::<Result<Vec<_>, FrameError>>()
            .unwrap();
        assert_eq!(lines, ["HELLO 1\r\n", "BYE\r\n", ""]);
        assert!(socket.stream().end());
    }

    #[test]
    fn socket_chunks_are_not_rewound() {
        let (left, mut peer) = UnixStream::pair().unwrap();
        let mut socket = Socket::new(Stream::from_unix(left), watch());
        peer.write_all(b"abcdef").unwrap();
        drop(peer);

        let total: usize = socket
            .chunks(4)
            .map(|chunk| chunk.unwrap().len())
            .sum();
        assert_eq!(total, 6);
        assert_eq!(socket.chunks(4).count(), 1);
    }

    #[test]
    fn silence_times_out() {
        let (left, _peer) = UnixStream::pair().unwrap();
        let mut socket = Socket::new(
            Stream::from_unix(left),
            SyncWatch::new().timeout_after(Duration::from_millis(10)),
        );

        assert!(matches!(
            socket.frames(frame::line()).one(),
            Err(FrameError::Unready)
        ));
    }

    #[test]
    fn heartbeat_pings_until_response() {
        let (left, peer) = UnixStream::pair().unwrap();
        let pings = Arc::new(AtomicUsize::new(0));
        let counted = pings.clone();

        let mut socket = Socket::new(
            Stream::from_unix(left),
            SyncWatch::new().timeout_after(Duration::from_millis(5)),
        )
        .with_heartbeat(
            move || {
                counted.fetch_add(1, Ordering::SeqCst);
                [Bytes::from_static(b"PING\n")]
            },
            || false,
        );

        let responder = std::thread::spawn(move || {
            let mut peer = peer;
            let mut ping = [0u8; 5];
            peer.read_exact(&mut ping).unwrap();
            assert_eq!(&ping, b"PING\n");
            peer.write_all(b"PONG\n").unwrap();
            peer
        });

        let reply = socket
            .frames(frame::line().filter(|line| line == "PONG\n"))
            .one()
            .unwrap();
        assert_eq!(reply, "PONG\n");
        assert!(pings.load(Ordering::SeqCst) >= 1);
        drop(responder.join().unwrap());
    }

    #[test]
    fn tcp_connection_info() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let socket = Socket::new(
            Stream::from_tcp(std::net::TcpStream::connect(addr).unwrap()),
            watch(),
        );

        let info = socket.info().unwrap();
        assert_eq!(info.remote_addr, SocketAddress::Tcp(addr));
    }

    /// Reports the peer of any socket, whatever watch it is bound to.
    fn remote_of<W>(socket: &Socket<W>) -> SocketAddress {
        socket.info().unwrap().remote_addr
    }

    #[test]
    fn connection_info_without_watch_bound() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let socket = Socket::new(
            Stream::from_tcp(std::net::TcpStream::connect(addr).unwrap()),
            watch(),
        );

        assert_eq!(remote_of(&socket), SocketAddress::Tcp(addr));
        assert!(!socket.closed());
        assert_eq!(socket.encoding(), None);
    }
}
