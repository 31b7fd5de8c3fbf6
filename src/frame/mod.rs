//! Composable decoders.
//!
//! A [`Frame`] describes how to derive a value from an [`Input`]. Frames are
//! plain values: decoding never mutates the frame, so the same frame can be
//! reused against any number of inputs. All mutation happens in the input.
//!
//! Frames are built from a handful of primitives:
//!
//! - [`just`] and [`optional`] resolve without reading.
//! - [`chunk`] reads up to a fixed number of bytes, either loosely or
//!   [strictly](Chunk::strict).
//! - [`line`] reads one line, terminator included.
//! - [`rest`] reads everything that remains.
//!
//! and combined with the methods on [`FrameExt`] and with [`compose`].
//!
//! ```rust
//! use bytes::Bytes;
//! use sluice::frame::{self, Frame, FrameExt};
//! use sluice::reader::Window;
//!
//! // A one byte length prefix followed by that many bytes.
//! let prefixed = frame::chunk(1)
//!     .strict()
//!     .map(|len| usize::from(len[0]))
//!     .flat_map(|len| frame::chunk(len).strict());
//!
//! let mut input = Window::new(Bytes::from_static(b"\x03abcdef"));
//! assert_eq!(prefixed.decode(&mut input).unwrap(), "abc");
//! ```

use std::sync::Arc;

use thiserror::Error;

use crate::encoding::TranscodeError;
use crate::reader::Input;
use crate::stream::StreamError;
use crate::watch::WatchError;

pub use self::combinator::{Buffer, Compose, Filter, FlatMap, Map};
pub use self::lazy::Lazy;
pub use self::primitive::{Chunk, Just, Line, OptionalValue, Rest};

mod combinator;
mod lazy;
mod primitive;

/// Errors from decoding a [`Frame`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FrameError {
    /// A filter or strict chunk rejected the decoded value.
    #[error("decoded value was rejected")]
    Rejected,

    /// An optional value was absent.
    #[error("no value to decode")]
    Missing,

    /// The stream yielded nothing although it is not at end-of-stream.
    #[error("failed to load stream")]
    Load,

    /// The stream did not become ready before the wait gave up.
    #[error("stream was not ready")]
    Unready,

    /// A chunk could not be transcoded.
    #[error(transparent)]
    Encoding(#[from] TranscodeError),

    /// The stream failed.
    #[error(transparent)]
    Stream(#[from] StreamError),

    /// Waiting for readiness failed.
    #[error(transparent)]
    Watch(#[from] WatchError),
}

/// A description of how to decode a value from an [`Input`].
pub trait Frame {
    /// The decoded value.
    type Output;

    /// Decode one value.
    fn decode(&self, input: &mut dyn Input) -> Result<Self::Output, FrameError>;
}

impl<F: Frame + ?Sized> Frame for &F {
    type Output = F::Output;

    fn decode(&self, input: &mut dyn Input) -> Result<Self::Output, FrameError> {
        (**self).decode(input)
    }
}

impl<F: Frame + ?Sized> Frame for Box<F> {
    type Output = F::Output;

    fn decode(&self, input: &mut dyn Input) -> Result<Self::Output, FrameError> {
        (**self).decode(input)
    }
}

impl<F: Frame + ?Sized> Frame for Arc<F> {
    type Output = F::Output;

    fn decode(&self, input: &mut dyn Input) -> Result<Self::Output, FrameError> {
        (**self).decode(input)
    }
}

/// A type-erased frame, for choosing between frames of different types at
/// runtime (for example, in the body of a [`FrameExt::flat_map`]).
pub type BoxFrame<'a, T> = Box<dyn Frame<Output = T> + 'a>;

/// Combinators available on every frame.
pub trait FrameExt: Frame + Sized {
    /// Transform the decoded value.
    fn map<M, U>(self, f: M) -> Map<Self, M>
    where
        M: Fn(Self::Output) -> U,
    {
        Map::new(self, f)
    }

    /// Decode a value, then decode again with a frame chosen from that value,
    /// against the same input.
    fn flat_map<M, G>(self, f: M) -> FlatMap<Self, M>
    where
        M: Fn(Self::Output) -> G,
        G: Frame,
    {
        FlatMap::new(self, f)
    }

    /// Fail with [`FrameError::Rejected`] unless the decoded value satisfies
    /// `predicate`.
    fn filter<P>(self, predicate: P) -> Filter<Self, P>
    where
        P: Fn(&Self::Output) -> bool,
    {
        Filter::new(self, predicate)
    }

    /// Pre-read `len` bytes and decode this frame against only those bytes.
    ///
    /// The frame must only use chunk reads. A line read inside a buffer panics.
    fn buffer(self, len: usize) -> Buffer<Self> {
        Buffer::new(len, self)
    }

    /// An unbounded, lazy sequence of decode attempts against `input`.
    ///
    /// The sequence never ends by itself; at end-of-stream chunk and line frames
    /// keep decoding to empty chunks. Truncate it with `take_while` or similar.
    fn lazy<I: Input>(self, input: I) -> Lazy<Self, I> {
        Lazy::new(self, input)
    }

    /// Erase the frame's type.
    fn boxed<'a>(self) -> BoxFrame<'a, Self::Output>
    where
        Self: 'a,
    {
        Box::new(self)
    }
}

impl<F: Frame> FrameExt for F {}

/// A frame which resolves to `value` without reading.
pub fn just<T: Clone>(value: T) -> Just<T> {
    Just::new(value)
}

/// A frame which resolves to the value, or fails with [`FrameError::Missing`].
pub fn optional<T: Clone>(value: Option<T>) -> OptionalValue<T> {
    OptionalValue::new(value)
}

/// A loose frame reading up to `len` bytes.
pub fn chunk(len: usize) -> Chunk {
    Chunk::new(len)
}

/// A frame reading one line.
pub fn line() -> Line {
    Line
}

/// A frame reading everything that remains.
pub fn rest() -> Rest {
    Rest
}

/// Decode `frame` against only the next `len` bytes.
pub fn buffer<F: Frame>(len: usize, frame: F) -> Buffer<F> {
    Buffer::new(len, frame)
}

/// Decode each frame of the tuple `frames` in order, then apply `f` to the
/// tuple of results.
pub fn compose<S, M, U>(f: M, frames: S) -> Compose<S, M>
where
    S: Frame,
    M: Fn(S::Output) -> U,
{
    Compose::new(f, frames)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Write;

    use bytes::Bytes;

    use crate::reader::Reader;
    use crate::stream::Stream;
    use crate::wait::Wait;
    use crate::watch::SyncWatch;

    use static_assertions::assert_obj_safe;

    assert_obj_safe!(Frame<Output = Bytes>);

    fn file(contents: &[u8]) -> Stream {
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(contents).unwrap();
        let mut stream = Stream::from_file(file);
        stream.rewind().unwrap();
        stream
    }

    fn decode<F: Frame>(frame: F, contents: &[u8]) -> Result<F::Output, FrameError> {
        let mut stream = file(contents);
        let wait = Wait::new(SyncWatch::new(), &stream);
        let mut reader = Reader::new(&mut stream, wait);
        frame.decode(&mut reader)
    }

    #[test]
    fn strict_and_loose_chunks() {
        assert_eq!(decode(chunk(4).loose(), b"ab").unwrap(), "ab");
        assert!(matches!(
            decode(chunk(4).strict(), b"ab"),
            Err(FrameError::Rejected)
        ));
        assert_eq!(decode(chunk(2).strict(), b"ab").unwrap(), "ab");
    }

    #[test]
    fn empty_stream_decodes_one_empty_chunk() {
        crate::fixtures::subscribe();
        assert_eq!(decode(chunk(8), b"").unwrap(), "");
        assert_eq!(decode(line(), b"").unwrap(), "");
        assert_eq!(decode(rest(), b"").unwrap(), "");
    }

    #[test]
    fn buffer_isolates_inner_frame() {
        let mut stream = file(b"0123456789");
        let wait = Wait::new(SyncWatch::new(), &stream);
        let mut reader = Reader::new(&mut stream, wait);

        // The inner frame asks for more than the window holds.
        let head = chunk(8).buffer(4).decode(&mut reader).unwrap();
        let next = chunk(3).decode(&mut reader).unwrap();

        assert_eq!(head, "0123");
        assert_eq!(next, "456");
    }

    #[test]
    fn buffer_under_consumption_still_skips_window() {
        let mut stream = file(b"abcdefgh");
        let wait = Wait::new(SyncWatch::new(), &stream);
        let mut reader = Reader::new(&mut stream, wait);

        let first = buffer(5, chunk(1)).decode(&mut reader).unwrap();
        assert_eq!(first, "a");
        assert_eq!(chunk(3).decode(&mut reader).unwrap(), "fgh");
    }

    #[test]
    fn buffer_window_counts_source_bytes() {
        let mut stream = file(b"\xe9\xe9\xe9\xe9rest");
        let wait = Wait::new(SyncWatch::new(), &stream);
        let mut reader =
            Reader::new(&mut stream, wait).with_encoding(Some(crate::encoding::Encoding::Latin1));

        let window = buffer(3, rest()).decode(&mut reader).unwrap();
        assert_eq!(window, "ééé");
        assert_eq!(rest().decode(&mut reader).unwrap(), "érest");
    }

    #[test]
    fn compose_decodes_in_order() {
        let frame = compose(
            |(a, b): (Bytes, Bytes)| format!("{}+{}", a.len(), b.len()),
            (chunk(3).strict(), chunk(4).strict()),
        );
        assert_eq!(decode(&frame, b"abcdefg").unwrap(), "3+4");
        assert!(decode(&frame, b"abcdef").is_err());
    }

    #[test]
    fn compose_is_positional() {
        let frame = compose(
            |(name, _, value): (Bytes, Bytes, Bytes)| (name, value),
            (chunk(4), chunk(1).filter(|sep| sep == ":"), rest()),
        );
        let (name, value) = decode(frame, b"host:example.org").unwrap();
        assert_eq!(name, "host");
        assert_eq!(value, "example.org");
    }

    #[test]
    fn flat_map_chooses_next_frame() {
        let frame = line().flat_map(|kind| -> BoxFrame<'static, Bytes> {
            if kind == "fixed\n" {
                chunk(2).boxed()
            } else {
                rest().boxed()
            }
        });

        assert_eq!(decode(&frame, b"fixed\nabcd").unwrap(), "ab");
        assert_eq!(decode(&frame, b"other\nabcd").unwrap(), "abcd");
    }

    #[test]
    fn filter_rejects() {
        let frame = line().filter(|line| line.starts_with(b"HTTP/"));
        assert!(decode(&frame, b"HTTP/1.1 200 OK\r\n").is_ok());
        assert!(matches!(
            decode(&frame, b"SMTP\r\n"),
            Err(FrameError::Rejected)
        ));
    }

    #[test]
    fn just_and_optional() {
        assert_eq!(decode(just(7), b"").unwrap(), 7);
        assert_eq!(decode(optional(Some("x")), b"").unwrap(), "x");
        assert!(matches!(
            decode(optional::<u8>(None), b""),
            Err(FrameError::Missing)
        ));
    }

    #[test]
    fn frames_are_reusable() {
        let frame = chunk(2).map(|chunk| chunk.len());
        for contents in [&b"ab"[..], &b"abc"[..], &b"a"[..]] {
            assert_eq!(decode(&frame, contents).unwrap(), contents.len().min(2));
        }
    }

    #[test]
    fn lazy_sequence_ends_in_empty_chunks() {
        let mut stream = file(b"one\ntwo\n");
        let wait = Wait::new(SyncWatch::new(), &stream);
        let mut reader = Reader::new(&mut stream, wait);

        let lines: Vec<Bytes> = line()
            .lazy(&mut reader)
            .map_while(Result::ok)
            .take_while(|line| !line.is_empty())
            .collect();
        assert_eq!(lines, ["one\n", "two\n"]);

        // Further decodes keep resolving to the end-of-stream sentinel.
        let mut after = line().lazy(&mut reader);
        assert_eq!(after.next().unwrap().unwrap(), "");
        assert_eq!(after.next().unwrap().unwrap(), "");
    }
}
