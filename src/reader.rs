//! The two pull primitives frames are decoded against.
//!
//! Frames never touch a [`Stream`] directly. They pull chunks and lines from an
//! [`Input`], which is either a [`Reader`] (a live stream, gated by a
//! [`Pending`] wait and transcoded through an optional [`Encoding`]) or a
//! [`Window`] (bytes already pulled into memory by a buffered frame).
//!
//! Both primitives follow the same end-of-stream convention: when nothing is
//! left they return an empty chunk rather than an error, so a sequence of
//! decodes over a stream ends with exactly one empty result.

use bytes::{Bytes, BytesMut};
use tracing::trace;

use crate::encoding::{Encoding, Transcode};
use crate::frame::FrameError;
use crate::stream::{Stream, StreamError};
use crate::wait::Pending;

/// A source of chunks and lines for frame decoding.
pub trait Input {
    /// Read up to `len` bytes, or everything remaining when `len` is `None`.
    fn read(&mut self, len: Option<usize>) -> Result<Bytes, FrameError>;

    /// Read one line, including its terminator when present.
    fn read_line(&mut self) -> Result<Bytes, FrameError>;

    /// Read `len` bytes as they arrive from the source, stopping short only at
    /// end-of-stream, and transcode them as a single unit.
    ///
    /// `len` counts source bytes, so an input which widens its bytes through
    /// an encoding still advances by exactly `len`.
    fn read_window(&mut self, len: usize) -> Result<Bytes, FrameError> {
        let mut window = BytesMut::with_capacity(len);
        while window.len() < len {
            let chunk = self.read(Some(len - window.len()))?;
            if chunk.is_empty() {
                break;
            }
            window.extend_from_slice(&chunk);
        }
        Ok(window.freeze())
    }
}

impl<I: Input + ?Sized> Input for &mut I {
    fn read(&mut self, len: Option<usize>) -> Result<Bytes, FrameError> {
        (**self).read(len)
    }

    fn read_line(&mut self) -> Result<Bytes, FrameError> {
        (**self).read_line()
    }

    fn read_window(&mut self, len: usize) -> Result<Bytes, FrameError> {
        (**self).read_window(len)
    }
}

impl<I: Input + ?Sized> Input for Box<I> {
    fn read(&mut self, len: Option<usize>) -> Result<Bytes, FrameError> {
        (**self).read(len)
    }

    fn read_line(&mut self) -> Result<Bytes, FrameError> {
        (**self).read_line()
    }

    fn read_window(&mut self, len: usize) -> Result<Bytes, FrameError> {
        (**self).read_window(len)
    }
}

/// A live [`Input`] over a stream.
#[derive(Debug)]
pub struct Reader<'a, P> {
    stream: &'a mut Stream,
    pending: P,
    encoding: Option<Encoding>,
}

impl<'a, P: Pending> Reader<'a, P> {
    /// Read from `stream`, waiting on `pending` before every pull.
    pub fn new(stream: &'a mut Stream, pending: P) -> Self {
        Self {
            stream,
            pending,
            encoding: None,
        }
    }

    /// Transcode every chunk through `encoding`.
    pub fn with_encoding(mut self, encoding: Option<Encoding>) -> Self {
        self.encoding = encoding;
        self
    }

    /// Wait for the stream, then pull raw bytes. Empty at end-of-stream.
    fn pull<F>(&mut self, pull: F) -> Result<Bytes, FrameError>
    where
        F: FnOnce(&mut Stream) -> Result<Option<Bytes>, StreamError>,
    {
        if !self.pending.ready(&mut *self.stream)? {
            trace!(handle = %self.stream.handle(), "stream not ready");
            return Err(FrameError::Unready);
        }

        match pull(&mut *self.stream)? {
            Some(chunk) => Ok(chunk),
            None if self.stream.end() => Ok(Bytes::new()),
            None => Err(FrameError::Load),
        }
    }

    fn load<F>(&mut self, pull: F) -> Result<Bytes, FrameError>
    where
        F: FnOnce(&mut Stream) -> Result<Option<Bytes>, StreamError>,
    {
        let chunk = self.pull(pull)?;
        match self.encoding {
            Some(encoding) if !chunk.is_empty() => {
                let chunk = self.complete(encoding, chunk)?;
                Ok(encoding.transcode(chunk)?)
            }
            _ => Ok(chunk),
        }
    }

    /// Hold back a character cut off by the end of `chunk` until the rest of
    /// it arrives.
    ///
    /// When the chunk holds nothing but the start of one character, single
    /// bytes are pulled until it is complete, so the chunk may exceed the
    /// requested length by up to three bytes.
    fn complete(&mut self, encoding: Encoding, mut chunk: Bytes) -> Result<Bytes, FrameError> {
        let tail = encoding.incomplete_tail(&chunk);
        if tail == 0 {
            return Ok(chunk);
        }

        if tail < chunk.len() {
            let rest = chunk.split_off(chunk.len() - tail);
            trace!(handle = %self.stream.handle(), held = rest.len(), "holding back split character");
            self.stream.unread(&rest);
            return Ok(chunk);
        }

        let mut partial = BytesMut::from(&chunk[..]);
        while encoding.incomplete_tail(&partial) > 0 {
            let more = match self.pull(|stream| stream.read(Some(1))) {
                Ok(more) => more,
                Err(error) => {
                    self.stream.unread(&partial);
                    return Err(error);
                }
            };
            if more.is_empty() {
                break;
            }
            partial.extend_from_slice(&more);
        }
        Ok(partial.freeze())
    }

    fn transcode(&self, chunk: Bytes) -> Result<Bytes, FrameError> {
        match self.encoding {
            Some(encoding) => Ok(encoding.transcode(chunk)?),
            None => Ok(chunk),
        }
    }
}

impl<P: Pending> Input for Reader<'_, P> {
    fn read(&mut self, len: Option<usize>) -> Result<Bytes, FrameError> {
        self.load(|stream| stream.read(len))
    }

    fn read_line(&mut self) -> Result<Bytes, FrameError> {
        self.load(Stream::read_line)
    }

    fn read_window(&mut self, len: usize) -> Result<Bytes, FrameError> {
        let mut window = BytesMut::with_capacity(len);
        while window.len() < len {
            let want = len - window.len();
            let chunk = self.pull(|stream| stream.read(Some(want)))?;
            if chunk.is_empty() {
                break;
            }
            window.extend_from_slice(&chunk);
        }
        self.transcode(window.freeze())
    }
}

/// An in-memory [`Input`] holding bytes pulled ahead by a buffered frame.
///
/// Only chunk reads are meaningful inside a window.
#[derive(Debug, Clone, Default)]
pub struct Window {
    data: Bytes,
}

impl Window {
    /// A window over `data`.
    pub fn new(data: Bytes) -> Self {
        Self { data }
    }

    /// Bytes not yet read.
    pub fn remaining(&self) -> usize {
        self.data.len()
    }
}

impl Input for Window {
    fn read(&mut self, len: Option<usize>) -> Result<Bytes, FrameError> {
        let len = len.unwrap_or(self.data.len()).min(self.data.len());
        Ok(self.data.split_to(len))
    }

    /// # Panics
    ///
    /// Line reads are not supported inside a buffered frame.
    fn read_line(&mut self) -> Result<Bytes, FrameError> {
        panic!("line reads are not supported inside a buffered frame");
    }
}
