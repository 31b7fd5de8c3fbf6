//! Handles to single byte resources.
//!
//! A [`Stream`] owns one OS resource (a file, pipe, socket or one of the
//! standard streams) and exposes the handful of operations the rest of the
//! crate needs: chunked and line reads, writes, seeking, end-of-stream and size
//! queries, and an idempotent close.
//!
//! Streams are identified by their [`Handle`], the raw descriptor captured when
//! the stream was created. The handle outlives the resource so that a closed
//! stream can still be removed from a [`Watch`](crate::watch::Watch).
//!
//! # Examples
//!
//! ```rust
//! use std::io::Write;
//! use sluice::stream::Stream;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut file = tempfile::tempfile()?;
//! file.write_all(b"first\nsecond")?;
//!
//! let mut stream = Stream::from_file(file);
//! stream.rewind()?;
//! assert_eq!(stream.read_line()?.as_deref(), Some(&b"first\n"[..]));
//! assert_eq!(stream.read(None)?.as_deref(), Some(&b"second"[..]));
//! assert!(stream.end());
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::fs::File;
use std::io::{self, Read, SeekFrom, Write};
use std::net::TcpStream;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;

use bytes::{Bytes, BytesMut};
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::size::Size;

pub(crate) use self::resource::Resource;

mod resource;

/// Bytes requested from the OS each time a line read needs more data.
const LINE_FILL: usize = 8 * 1024;

/// Errors from operations on a [`Stream`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StreamError {
    /// The resource could not be opened.
    #[error("failed to open {target}: {source}")]
    Open {
        /// What was being opened.
        target: String,

        /// The underlying failure.
        #[source]
        source: io::Error,
    },

    /// The stream was already closed.
    #[error("stream is closed")]
    Closed,

    /// Fewer bytes were written than requested.
    #[error("partial write: {written} of {expected} bytes")]
    PartialWrite {
        /// Bytes actually accepted by the resource.
        written: usize,

        /// Bytes handed to the write.
        expected: usize,
    },

    /// The stream cannot seek, or the target lies outside the stream.
    #[error("position not seekable")]
    NotSeekable,

    /// Shutting the resource down failed.
    #[error("failed to close stream: {0}")]
    Close(#[source] io::Error),

    /// Any other IO failure.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl StreamError {
    pub(crate) fn open<T: fmt::Display>(target: T, source: io::Error) -> Self {
        let target = target.to_string();
        debug!(%target, "open failed: {}", source);
        Self::Open { target, source }
    }
}

/// Stable identity of a stream or server: its raw descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(RawFd);

impl Handle {
    /// The raw descriptor value.
    pub fn raw(&self) -> RawFd {
        self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fd:{}", self.0)
    }
}

impl<T: AsRawFd> From<&T> for Handle {
    fn from(value: &T) -> Self {
        Handle(value.as_raw_fd())
    }
}

/// A handle to one underlying byte resource.
pub struct Stream {
    resource: Option<Resource>,
    handle: Handle,
    seekable: bool,
    eof: bool,
    lookahead: BytesMut,
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("resource", &self.resource)
            .field("handle", &self.handle)
            .field("seekable", &self.seekable)
            .field("eof", &self.eof)
            .field("buffered", &self.lookahead.len())
            .finish()
    }
}

impl Stream {
    fn new(resource: Resource) -> Self {
        let handle = Handle::from(&resource);
        let seekable = resource.is_seekable();
        trace!(%handle, seekable, "stream created");
        Self {
            resource: Some(resource),
            handle,
            seekable,
            eof: false,
            lookahead: BytesMut::new(),
        }
    }

    /// Wrap an open file. Regular files are seekable; special files are not.
    pub fn from_file(file: File) -> Self {
        Self::new(Resource::File(file))
    }

    /// Wrap a pipe or other non-seekable descriptor, such as a child process's stdout.
    pub fn from_fd(fd: impl Into<OwnedFd>) -> Self {
        Self::new(Resource::Pipe(File::from(fd.into())))
    }

    /// Wrap a connected TCP socket.
    pub fn from_tcp(stream: TcpStream) -> Self {
        Self::new(Resource::Tcp(stream))
    }

    /// Wrap a connected Unix domain socket.
    pub fn from_unix(stream: UnixStream) -> Self {
        Self::new(Resource::Unix(stream))
    }

    /// The process's standard input.
    pub fn stdin() -> Self {
        Self::new(Resource::Stdin(io::stdin()))
    }

    /// The process's standard output.
    pub fn stdout() -> Self {
        Self::new(Resource::Stdout(io::stdout()))
    }

    /// The process's standard error.
    pub fn stderr() -> Self {
        Self::new(Resource::Stderr(io::stderr()))
    }

    /// Identity of this stream.
    pub fn handle(&self) -> Handle {
        self.handle
    }

    /// Whether [`Stream::seek`] can succeed. Computed once at creation.
    pub fn is_seekable(&self) -> bool {
        self.seekable
    }

    /// Whether the stream has been closed. Once true, never reverts.
    pub fn closed(&self) -> bool {
        self.resource.is_none()
    }

    /// Bytes already pulled from the OS but not yet handed out.
    ///
    /// A stream with buffered bytes can be read without waiting for readiness.
    pub fn buffered(&self) -> usize {
        self.lookahead.len()
    }

    /// Whether the stream is at end-of-stream.
    ///
    /// End-of-stream is reached once the OS has reported it and every buffered
    /// byte has been handed out. Closed streams are always at the end.
    pub fn end(&self) -> bool {
        self.closed() || (self.eof && self.lookahead.is_empty())
    }

    /// Size of the stream, if open and backed by a positive byte count.
    pub fn size(&self) -> Option<Size> {
        self.resource
            .as_ref()
            .and_then(Resource::len)
            .filter(|len| *len > 0)
            .map(Size::new)
    }

    pub(crate) fn resource(&self) -> Option<&Resource> {
        self.resource.as_ref()
    }

    fn resource_mut(&mut self) -> Result<&mut Resource, StreamError> {
        self.resource.as_mut().ok_or(StreamError::Closed)
    }

    /// Read up to `len` bytes, or everything that remains when `len` is `None`.
    ///
    /// Seekable streams fill the request across several OS reads and stop short
    /// only at end-of-file. Other streams return what a single OS read yields.
    /// `Ok(None)` means no bytes were available; check [`Stream::end`] to tell
    /// end-of-stream apart from a resource with nothing to hand out right now.
    pub fn read(&mut self, len: Option<usize>) -> Result<Option<Bytes>, StreamError> {
        match len {
            Some(len) => self.read_exact_or_short(len),
            None => self.read_remaining(),
        }
    }

    fn read_exact_or_short(&mut self, len: usize) -> Result<Option<Bytes>, StreamError> {
        self.resource_mut()?;
        if len == 0 {
            return Ok(Some(Bytes::new()));
        }

        let from_lookahead = len.min(self.lookahead.len());
        let mut buf = self.lookahead.split_to(from_lookahead);

        while buf.len() < len && !self.eof && (buf.is_empty() || self.seekable) {
            let filled = buf.len();
            buf.resize(len, 0);
            let resource = self.resource.as_mut().ok_or(StreamError::Closed)?;
            match resource.read(&mut buf[filled..]) {
                Ok(0) => {
                    buf.truncate(filled);
                    self.eof = true;
                }
                Ok(n) => {
                    buf.truncate(filled + n);
                    if !self.seekable {
                        break;
                    }
                }
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {
                    buf.truncate(filled);
                }
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => {
                    buf.truncate(filled);
                    break;
                }
                Err(error) => return Err(error.into()),
            }
        }

        Ok(Some(buf.freeze()).filter(|chunk| !chunk.is_empty()))
    }

    fn read_remaining(&mut self) -> Result<Option<Bytes>, StreamError> {
        let mut rest = Vec::new();
        let resource = self.resource.as_mut().ok_or(StreamError::Closed)?;
        match resource.read_to_end(&mut rest) {
            Ok(_) => self.eof = true,
            Err(error) if error.kind() == io::ErrorKind::WouldBlock => {}
            Err(error) => return Err(error.into()),
        }

        let mut buf = self.lookahead.split();
        buf.extend_from_slice(&rest);
        Ok(Some(buf.freeze()).filter(|chunk| !chunk.is_empty()))
    }

    /// Push `bytes` back in front of the look-ahead, to be read again next.
    pub(crate) fn unread(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        let mut lookahead = BytesMut::with_capacity(bytes.len() + self.lookahead.len());
        lookahead.extend_from_slice(bytes);
        lookahead.extend_from_slice(&self.lookahead);
        self.lookahead = lookahead;
    }

    /// Read one line, including its `\n` terminator when present.
    ///
    /// The final line of a stream has no terminator. `Ok(None)` follows the same
    /// rules as [`Stream::read`].
    pub fn read_line(&mut self) -> Result<Option<Bytes>, StreamError> {
        self.resource_mut()?;
        let mut scanned = 0;
        loop {
            if let Some(pos) = self.lookahead[scanned..].iter().position(|b| *b == b'\n') {
                let line = self.lookahead.split_to(scanned + pos + 1);
                return Ok(Some(line.freeze()));
            }
            scanned = self.lookahead.len();

            if self.eof {
                let rest = self.lookahead.split().freeze();
                return Ok(Some(rest).filter(|line| !line.is_empty()));
            }

            let filled = self.lookahead.len();
            self.lookahead.resize(filled + LINE_FILL, 0);
            let resource = self.resource.as_mut().ok_or(StreamError::Closed)?;
            match resource.read(&mut self.lookahead[filled..]) {
                Ok(0) => {
                    self.lookahead.truncate(filled);
                    self.eof = true;
                }
                Ok(n) => self.lookahead.truncate(filled + n),
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {
                    self.lookahead.truncate(filled);
                }
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => {
                    self.lookahead.truncate(filled);
                    return Ok(None);
                }
                Err(error) => {
                    self.lookahead.truncate(filled);
                    return Err(error.into());
                }
            }
        }
    }

    /// Write all of `data` in one OS write.
    ///
    /// A short write is reported as [`StreamError::PartialWrite`] carrying the
    /// number of bytes which were written, so the caller can decide whether to
    /// retry the remainder.
    pub fn write(&mut self, data: &[u8]) -> Result<(), StreamError> {
        self.resource_mut()?;
        if data.is_empty() {
            return Ok(());
        }
        self.discard_lookahead()?;

        let handle = self.handle;
        let resource = self.resource_mut()?;
        loop {
            match resource.write(data) {
                Ok(written) if written == data.len() => return Ok(()),
                Ok(written) => {
                    warn!(%handle, written, expected = data.len(), "partial write");
                    return Err(StreamError::PartialWrite {
                        written,
                        expected: data.len(),
                    });
                }
                Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
                Err(error) => return Err(error.into()),
            }
        }
    }

    /// Flush buffered writes, syncing regular files to disk.
    pub fn flush(&mut self) -> Result<(), StreamError> {
        self.resource_mut()?.sync()?;
        Ok(())
    }

    /// Move the OS position back over bytes which were read ahead but not consumed,
    /// so that writes land where the caller expects.
    fn discard_lookahead(&mut self) -> Result<(), StreamError> {
        if self.seekable && !self.lookahead.is_empty() {
            let back = self.lookahead.len() as i64;
            self.resource_mut()?.seek(SeekFrom::Current(-back))?;
            self.lookahead.clear();
        }
        Ok(())
    }

    /// Seek to a new position, returning the new offset from the start.
    ///
    /// Fails with [`StreamError::NotSeekable`] when the stream is not seekable
    /// or the target would lie before the start or beyond the current size.
    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64, StreamError> {
        if !self.seekable {
            self.resource_mut()?;
            return Err(StreamError::NotSeekable);
        }

        let handle = self.handle;
        let buffered = self.lookahead.len() as i128;
        let resource = self.resource.as_mut().ok_or(StreamError::Closed)?;
        let size = resource.len().unwrap_or(0) as i128;
        let current = resource.position()? as i128 - buffered;

        let target = match pos {
            SeekFrom::Start(offset) => offset as i128,
            SeekFrom::Current(delta) => current + delta as i128,
            SeekFrom::End(delta) => size + delta as i128,
        };

        if target < 0 || target > size {
            debug!(%handle, target, size, "seek out of bounds");
            return Err(StreamError::NotSeekable);
        }

        let target = target as u64;
        resource.seek(SeekFrom::Start(target))?;
        self.lookahead.clear();
        self.eof = false;
        Ok(target)
    }

    /// Seek back to the start of the stream.
    pub fn rewind(&mut self) -> Result<(), StreamError> {
        self.seek(SeekFrom::Start(0)).map(|_| ())
    }

    /// Close the stream. Closing an already closed stream is a no-op.
    pub fn close(&mut self) -> Result<(), StreamError> {
        let Some(resource) = self.resource.take() else {
            return Ok(());
        };

        self.lookahead.clear();
        debug!(handle = %self.handle, "closing stream");
        resource.shutdown().map_err(StreamError::Close)
    }
}

impl From<File> for Stream {
    fn from(file: File) -> Self {
        Stream::from_file(file)
    }
}

impl From<TcpStream> for Stream {
    fn from(stream: TcpStream) -> Self {
        Stream::from_tcp(stream)
    }
}

impl From<UnixStream> for Stream {
    fn from(stream: UnixStream) -> Self {
        Stream::from_unix(stream)
    }
}
