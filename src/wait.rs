//! Waiting on a single stream.
//!
//! A [`Wait`] narrows a [`Watch`] down to one question: is *this* stream
//! readable? A [`Heartbeat`] asks the same question repeatedly, writing
//! keep-alive chunks to the peer between attempts until the stream becomes
//! ready or the caller gives up.

use bytes::Bytes;
use tracing::{debug, trace};

use crate::stream::{Stream, StreamError};
use crate::watch::{Watch, WatchError};

/// A policy deciding whether a stream can be read without blocking forever.
///
/// `Ok(false)` means the stream did not become ready: the watch timed out or
/// the policy gave up.
pub trait Pending {
    /// Wait until `stream` is ready for reading, or until the policy gives up.
    fn ready(&mut self, stream: &mut Stream) -> Result<bool, WatchError>;
}

impl<P: Pending + ?Sized> Pending for &mut P {
    fn ready(&mut self, stream: &mut Stream) -> Result<bool, WatchError> {
        (**self).ready(stream)
    }
}

impl<P: Pending + ?Sized> Pending for Box<P> {
    fn ready(&mut self, stream: &mut Stream) -> Result<bool, WatchError> {
        (**self).ready(stream)
    }
}

/// A watch configured to read one stream.
#[derive(Debug, Clone)]
pub struct Wait<W> {
    watch: W,
}

impl<W: Watch> Wait<W> {
    /// Watch `stream` for reading with `watch`'s timeout.
    pub fn new(watch: W, stream: &Stream) -> Self {
        Self {
            watch: watch.for_read([stream]),
        }
    }

    /// The underlying watch.
    pub fn watch(&self) -> &W {
        &self.watch
    }

    /// Whether `stream` is ready to read.
    ///
    /// Buffered bytes and end-of-stream resolve immediately, without invoking
    /// the watch.
    pub fn invoke(&self, stream: &Stream) -> Result<bool, WatchError> {
        if stream.buffered() > 0 || stream.end() {
            return Ok(true);
        }

        let ready = self.watch.invoke()?;
        Ok(ready.is_readable(stream.handle()))
    }
}

impl<W: Watch> Pending for Wait<W> {
    fn ready(&mut self, stream: &mut Stream) -> Result<bool, WatchError> {
        self.invoke(stream)
    }
}

/// Writes a heartbeat chunk to a stream.
pub type Sink = fn(&mut Stream, &[u8]) -> Result<(), StreamError>;

fn write_through(stream: &mut Stream, chunk: &[u8]) -> Result<(), StreamError> {
    stream.write(chunk)
}

/// A wait which keeps the peer busy while nothing arrives.
///
/// Each time the underlying [`Wait`] resolves without the stream becoming
/// ready, every chunk from `provider` is pushed through the sink. The heartbeat
/// gives up (resolving not ready) once `abort` returns true, the stream has
/// closed, or a heartbeat write fails.
pub struct Heartbeat<W, P, A, S = Sink> {
    wait: Wait<W>,
    provider: P,
    abort: A,
    sink: S,
}

impl<W, P, A, S> std::fmt::Debug for Heartbeat<W, P, A, S>
where
    W: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Heartbeat")
            .field("wait", &self.wait)
            .finish_non_exhaustive()
    }
}

impl<W, P, A, I> Heartbeat<W, P, A>
where
    W: Watch,
    P: FnMut() -> I,
    I: IntoIterator<Item = Bytes>,
    A: FnMut() -> bool,
{
    /// Heartbeat on `wait`, writing chunks from `provider` to the waited stream.
    pub fn new(wait: Wait<W>, provider: P, abort: A) -> Self {
        Self {
            wait,
            provider,
            abort,
            sink: write_through,
        }
    }
}

impl<W, P, A, S> Heartbeat<W, P, A, S> {
    /// Send heartbeat chunks through `sink` instead of writing them to the
    /// waited stream.
    pub fn with_sink<S2>(self, sink: S2) -> Heartbeat<W, P, A, S2>
    where
        S2: FnMut(&mut Stream, &[u8]) -> Result<(), StreamError>,
    {
        Heartbeat {
            wait: self.wait,
            provider: self.provider,
            abort: self.abort,
            sink,
        }
    }
}

impl<W, P, A, S, I> Pending for Heartbeat<W, P, A, S>
where
    W: Watch,
    P: FnMut() -> I,
    I: IntoIterator<Item = Bytes>,
    A: FnMut() -> bool,
    S: FnMut(&mut Stream, &[u8]) -> Result<(), StreamError>,
{
    fn ready(&mut self, stream: &mut Stream) -> Result<bool, WatchError> {
        let handle = stream.handle();
        loop {
            if self.wait.invoke(stream)? {
                return Ok(true);
            }

            let mut failed = false;
            for chunk in (self.provider)() {
                if let Err(error) = (self.sink)(stream, &chunk) {
                    debug!(%handle, "heartbeat write failed: {}", error);
                    failed = true;
                    break;
                }
                trace!(%handle, len = chunk.len(), "heartbeat");
            }

            if failed || stream.closed() || (self.abort)() {
                trace!(%handle, "heartbeat gave up");
                return Ok(false);
            }
        }
    }
}
