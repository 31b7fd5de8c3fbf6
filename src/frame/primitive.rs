use bytes::Bytes;

use super::{Frame, FrameError};
use crate::reader::Input;

/// Resolves to a fixed value without reading. See [`just`](super::just).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Just<T>(T);

impl<T> Just<T> {
    /// A frame resolving to `value`.
    pub fn new(value: T) -> Self {
        Just(value)
    }
}

impl<T: Clone> Frame for Just<T> {
    type Output = T;

    fn decode(&self, _: &mut dyn Input) -> Result<T, FrameError> {
        Ok(self.0.clone())
    }
}

/// Resolves to a value if present. See [`optional`](super::optional).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionalValue<T>(Option<T>);

impl<T> OptionalValue<T> {
    /// A frame resolving to `value`, or failing when it is `None`.
    pub fn new(value: Option<T>) -> Self {
        OptionalValue(value)
    }
}

impl<T: Clone> Frame for OptionalValue<T> {
    type Output = T;

    fn decode(&self, _: &mut dyn Input) -> Result<T, FrameError> {
        self.0.clone().ok_or(FrameError::Missing)
    }
}

/// Reads up to a fixed number of bytes. See [`chunk`](super::chunk).
///
/// A loose chunk accepts whatever the input yields, including a short read at
/// end-of-stream. A strict chunk rejects any result whose length differs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    len: usize,
    strict: bool,
}

impl Chunk {
    /// A loose chunk of `len` bytes.
    pub fn new(len: usize) -> Self {
        Chunk { len, strict: false }
    }

    /// Accept short chunks.
    pub fn loose(self) -> Self {
        Chunk {
            strict: false,
            ..self
        }
    }

    /// Reject chunks shorter than the requested length.
    pub fn strict(self) -> Self {
        Chunk {
            strict: true,
            ..self
        }
    }

    /// The requested length.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether no bytes are requested.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether short chunks are rejected.
    pub fn is_strict(&self) -> bool {
        self.strict
    }
}

impl Frame for Chunk {
    type Output = Bytes;

    fn decode(&self, input: &mut dyn Input) -> Result<Bytes, FrameError> {
        let chunk = input.read(Some(self.len))?;
        if self.strict && chunk.len() != self.len {
            tracing::trace!(expected = self.len, got = chunk.len(), "strict chunk rejected");
            return Err(FrameError::Rejected);
        }
        Ok(chunk)
    }
}

/// Reads one line. See [`line`](super::line).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Line;

impl Frame for Line {
    type Output = Bytes;

    fn decode(&self, input: &mut dyn Input) -> Result<Bytes, FrameError> {
        input.read_line()
    }
}

/// Reads everything that remains. See [`rest`](super::rest).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rest;

impl Frame for Rest {
    type Output = Bytes;

    fn decode(&self, input: &mut dyn Input) -> Result<Bytes, FrameError> {
        input.read(None)
    }
}
