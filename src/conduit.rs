//! A stream bound to a watch, ready for chunk, line and frame consumption.
//!
//! [`Conduit`] is the common core of the [`File`](crate::file::File),
//! [`Socket`](crate::socket::Socket) and [`Pool`](crate::pool::Pool) façades.
//! It owns one [`Stream`], a template [`Watch`] (usually carrying only a
//! timeout) and an optional [`Encoding`], and builds a fresh
//! [`Reader`] for every decode.

use std::fmt;

use bytes::Bytes;
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::encoding::Encoding;
use crate::frame::{self, Frame, FrameError, FrameExt, Lazy};
use crate::reader::Reader;
use crate::stream::{Stream, StreamError};
use crate::wait::{Heartbeat, Pending, Wait};
use crate::watch::{Watch, WatchError};

/// Errors from [`Conduit::sink`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SinkError {
    /// A write, flush or close failed.
    #[error(transparent)]
    Stream(#[from] StreamError),

    /// Waiting for write readiness failed.
    #[error(transparent)]
    Watch(#[from] WatchError),

    /// The stream did not become writable before the watch timed out.
    #[error("stream was not ready for writing")]
    Unready,
}

type Provider = Box<dyn FnMut() -> Vec<Bytes> + Send>;
type Abort = Box<dyn FnMut() -> bool + Send>;

/// Keep-alive traffic written while waiting for a response.
struct Beat {
    provider: Provider,
    abort: Abort,
}

/// A reader handed out by [`Conduit::reader`].
pub type ConduitReader<'a> = Reader<'a, Box<dyn Pending + 'a>>;

/// A stream bound to a watch and an optional encoding.
pub struct Conduit<W> {
    stream: Stream,
    watch: W,
    encoding: Option<Encoding>,
    heartbeat: Option<Beat>,
    rewindable: bool,
    watch_writes: bool,
    close_after_sink: bool,
}

impl<W: fmt::Debug> fmt::Debug for Conduit<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conduit")
            .field("stream", &self.stream)
            .field("watch", &self.watch)
            .field("encoding", &self.encoding)
            .field("heartbeat", &self.heartbeat.is_some())
            .field("rewindable", &self.rewindable)
            .field("watch_writes", &self.watch_writes)
            .field("close_after_sink", &self.close_after_sink)
            .finish()
    }
}

impl<W> Conduit<W> {
    /// The underlying stream.
    pub fn stream(&self) -> &Stream {
        &self.stream
    }

    /// Mutable access to the underlying stream.
    pub fn stream_mut(&mut self) -> &mut Stream {
        &mut self.stream
    }

    /// The template watch.
    pub fn watch(&self) -> &W {
        &self.watch
    }

    /// The configured encoding.
    pub fn encoding(&self) -> Option<Encoding> {
        self.encoding
    }

    /// Release the stream.
    pub fn into_stream(self) -> Stream {
        self.stream
    }

    /// Close the stream. Closing twice is a no-op.
    pub fn close(&mut self) -> Result<(), StreamError> {
        self.stream.close()
    }

    /// Whether the stream is closed.
    pub fn closed(&self) -> bool {
        self.stream.closed()
    }
}

impl<W: Watch> Conduit<W> {
    /// Bind `stream` to `watch`.
    ///
    /// The watch is used as a template: each wait clones it and adds the
    /// stream, so it should carry a timeout and nothing else.
    pub fn new(stream: Stream, watch: W) -> Self {
        Self {
            stream,
            watch,
            encoding: None,
            heartbeat: None,
            rewindable: false,
            watch_writes: false,
            close_after_sink: false,
        }
    }

    /// Transcode everything read through `encoding`.
    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = Some(encoding);
        self
    }

    /// Rewind the stream once a chunk or line sequence is fully consumed, so
    /// that it can be replayed. Has no effect on streams which cannot seek.
    pub fn rewindable(mut self, rewindable: bool) -> Self {
        self.rewindable = rewindable;
        self
    }

    /// Wait for write readiness before each chunk written by [`Conduit::sink`].
    pub fn watch_writes(mut self, watch_writes: bool) -> Self {
        self.watch_writes = watch_writes;
        self
    }

    /// Close the stream once [`Conduit::sink`] finishes, whether or not it
    /// succeeded.
    pub fn close_after_sink(mut self, close: bool) -> Self {
        self.close_after_sink = close;
        self
    }

    /// While waiting to read, write every chunk `provider` yields to the stream,
    /// and give up once `abort` returns true.
    pub fn with_heartbeat<P, I, A>(mut self, mut provider: P, abort: A) -> Self
    where
        P: FnMut() -> I + Send + 'static,
        I: IntoIterator<Item = Bytes>,
        A: FnMut() -> bool + Send + 'static,
    {
        self.heartbeat = Some(Beat {
            provider: Box::new(move || provider().into_iter().collect()),
            abort: Box::new(abort),
        });
        self
    }

    /// A fresh reader over the stream, honoring the watch, heartbeat and
    /// encoding.
    pub fn reader(&mut self) -> ConduitReader<'_> {
        let wait = Wait::new(self.watch.clone(), &self.stream);
        let pending: Box<dyn Pending + '_> = match &mut self.heartbeat {
            Some(beat) => Box::new(Heartbeat::new(wait, &mut beat.provider, &mut beat.abort)),
            None => Box::new(wait),
        };
        Reader::new(&mut self.stream, pending).with_encoding(self.encoding)
    }

    /// Decode one value with `frame`.
    pub fn decode<F: Frame>(&mut self, frame: F) -> Result<F::Output, FrameError> {
        let _span = tracing::trace_span!("frame.decode", handle = %self.stream.handle()).entered();
        frame.decode(&mut self.reader())
    }

    /// Chunks of at most `size` bytes until end-of-stream.
    ///
    /// # Panics
    ///
    /// `size` must be positive: a zero-sized read can never reach
    /// end-of-stream.
    pub fn chunks(&mut self, size: usize) -> Decoded<'_, W, frame::Chunk> {
        assert!(size > 0, "chunk size must be positive");
        Decoded::new(self, frame::chunk(size))
    }

    /// Lines, terminators included, until end-of-stream.
    pub fn lines(&mut self) -> Decoded<'_, W, frame::Line> {
        Decoded::new(self, frame::line())
    }

    /// Decode with `frame`: once, until end-of-stream, or lazily.
    pub fn frames<F: Frame>(&mut self, frame: F) -> Frames<'_, W, F> {
        Frames {
            conduit: self,
            frame,
        }
    }

    /// Write `chunks` one at a time, then flush.
    ///
    /// Writing stops at the first failure. When configured with
    /// [`Conduit::close_after_sink`], the stream is closed afterwards, also when
    /// writing failed; the original failure is the one reported.
    ///
    /// Returns the number of bytes written.
    pub fn sink<I>(&mut self, chunks: I) -> Result<usize, SinkError>
    where
        I: IntoIterator,
        I::Item: AsRef<[u8]>,
    {
        let result = self.write_all(chunks);
        if self.close_after_sink {
            if let Err(error) = self.stream.close() {
                warn!(handle = %self.stream.handle(), "close after sink failed: {}", error);
                if result.is_ok() {
                    return Err(error.into());
                }
            }
        }
        result
    }

    fn write_all<I>(&mut self, chunks: I) -> Result<usize, SinkError>
    where
        I: IntoIterator,
        I::Item: AsRef<[u8]>,
    {
        let handle = self.stream.handle();
        let mut written = 0;
        for chunk in chunks {
            let chunk = chunk.as_ref();
            if self.watch_writes {
                let ready = self
                    .watch
                    .clone()
                    .clear()
                    .for_write([&self.stream])
                    .invoke()?;
                if !ready.is_writable(handle) {
                    debug!(%handle, "sink timed out waiting for write readiness");
                    return Err(SinkError::Unready);
                }
            }

            self.stream.write(chunk)?;
            written += chunk.len();
        }

        self.stream.flush()?;
        trace!(%handle, written, "sink finished");
        Ok(written)
    }
}

/// Values decoded until end-of-stream. See [`Conduit::chunks`].
///
/// The sequence ends after the first value decoded at end-of-stream, or after
/// the first error. A rewindable conduit rewinds once the stream is exhausted.
pub struct Decoded<'a, W, F> {
    conduit: &'a mut Conduit<W>,
    frame: F,
    done: bool,
}

impl<W: fmt::Debug, F: fmt::Debug> fmt::Debug for Decoded<'_, W, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Decoded")
            .field("conduit", &self.conduit)
            .field("frame", &self.frame)
            .field("done", &self.done)
            .finish()
    }
}

impl<'a, W: Watch, F: Frame> Decoded<'a, W, F> {
    fn new(conduit: &'a mut Conduit<W>, frame: F) -> Self {
        Self {
            conduit,
            frame,
            done: false,
        }
    }

    fn finish(&mut self) {
        self.done = true;
        let stream = &mut self.conduit.stream;
        if self.conduit.rewindable && stream.is_seekable() && !stream.closed() {
            if let Err(error) = stream.rewind() {
                warn!(handle = %stream.handle(), "rewind after sequence failed: {}", error);
            }
        }
    }
}

impl<W: Watch, F: Frame> Iterator for Decoded<'_, W, F> {
    type Item = Result<F::Output, FrameError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let result = self.conduit.decode(&self.frame);
        if result.is_err() || self.conduit.stream.end() {
            self.finish();
        }
        Some(result)
    }
}

/// Frame decoding entry points. See [`Conduit::frames`].
pub struct Frames<'a, W, F> {
    conduit: &'a mut Conduit<W>,
    frame: F,
}

impl<W: fmt::Debug, F: fmt::Debug> fmt::Debug for Frames<'_, W, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frames")
            .field("conduit", &self.conduit)
            .field("frame", &self.frame)
            .finish()
    }
}

impl<'a, W: Watch, F: Frame> Frames<'a, W, F> {
    /// Decode a single value.
    pub fn one(self) -> Result<F::Output, FrameError> {
        self.conduit.decode(self.frame)
    }

    /// Decode values until end-of-stream, stopping at the first error.
    pub fn sequence(self) -> Result<Vec<F::Output>, FrameError> {
        self.iter().collect()
    }

    /// Decode values lazily until end-of-stream or the first error.
    pub fn iter(self) -> Decoded<'a, W, F> {
        Decoded::new(self.conduit, self.frame)
    }

    /// The unbounded sequence of decode attempts.
    pub fn lazy(self) -> Lazy<F, ConduitReader<'a>> {
        self.frame.lazy(self.conduit.reader())
    }
}
