//! Character encodings applied to decoded chunks.
//!
//! Chunks pulled from a [`Reader`](crate::reader::Reader) are passed through an
//! [`Encoding`] before a frame sees them. The transform is opaque to the frame
//! algebra: it receives raw bytes and returns UTF-8 bytes, or reports that the
//! chunk cannot be represented.

use std::fmt;
use std::str::FromStr;

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

/// A chunk could not be transcoded.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("chunk is not valid {encoding} at byte {offset}")]
pub struct TranscodeError {
    encoding: Encoding,
    offset: usize,
}

impl TranscodeError {
    /// The encoding which rejected the chunk.
    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Offset of the first byte which could not be transcoded.
    pub fn offset(&self) -> usize {
        self.offset
    }
}

/// The encoding name was not recognized.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown encoding: {0}")]
pub struct UnknownEncoding(String);

/// A transform from source bytes to UTF-8 bytes.
pub trait Transcode {
    /// Transcode one chunk.
    fn transcode(&self, chunk: Bytes) -> Result<Bytes, TranscodeError>;

    /// Number of bytes at the end of `chunk` which start a character that the
    /// chunk does not finish. Such bytes are held back until the rest arrives.
    fn incomplete_tail(&self, chunk: &[u8]) -> usize {
        let _ = chunk;
        0
    }
}

/// The closed set of supported source encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Encoding {
    /// UTF-8. Chunks pass through unchanged after validation.
    Utf8,

    /// ISO-8859-1. Every byte maps to the code point of the same value.
    Latin1,
}

impl Encoding {
    /// Canonical name of the encoding.
    pub fn name(&self) -> &'static str {
        match self {
            Encoding::Utf8 => "UTF-8",
            Encoding::Latin1 => "ISO-8859-1",
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Encoding {
    type Err = UnknownEncoding;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "utf-8" | "utf8" => Ok(Encoding::Utf8),
            "iso-8859-1" | "latin1" | "latin-1" => Ok(Encoding::Latin1),
            _ => Err(UnknownEncoding(s.to_owned())),
        }
    }
}

impl Transcode for Encoding {
    fn transcode(&self, chunk: Bytes) -> Result<Bytes, TranscodeError> {
        match self {
            Encoding::Utf8 => match std::str::from_utf8(&chunk) {
                Ok(_) => Ok(chunk),
                Err(error) => Err(TranscodeError {
                    encoding: *self,
                    offset: error.valid_up_to(),
                }),
            },
            Encoding::Latin1 => {
                if chunk.is_ascii() {
                    return Ok(chunk);
                }

                let mut out = BytesMut::with_capacity(chunk.len() * 2);
                for &byte in chunk.iter() {
                    let mut buf = [0u8; 4];
                    out.put_slice(char::from(byte).encode_utf8(&mut buf).as_bytes());
                }
                Ok(out.freeze())
            }
        }
    }

    fn incomplete_tail(&self, chunk: &[u8]) -> usize {
        match self {
            Encoding::Utf8 => match std::str::from_utf8(chunk) {
                Err(error) if error.error_len().is_none() => chunk.len() - error.valid_up_to(),
                _ => 0,
            },
            Encoding::Latin1 => 0,
        }
    }
}
