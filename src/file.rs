//! Files as conduits.

use std::ops::{Deref, DerefMut};

use crate::conduit::Conduit;
use crate::encoding::Encoding;
use crate::size::Size;
use crate::stream::Stream;
use crate::watch::Watch;

/// A [`Conduit`] over a file.
///
/// Files are rewindable by default: once a chunk or line sequence has been
/// fully consumed the file is rewound, so the sequence can be read again.
///
/// Open files through [`Capabilities`](crate::cap::Capabilities).
#[derive(Debug)]
pub struct File<W> {
    conduit: Conduit<W>,
}

impl<W: Watch> File<W> {
    /// Wrap an open file stream.
    pub fn new(stream: Stream, watch: W) -> Self {
        Self {
            conduit: Conduit::new(stream, watch).rewindable(true),
        }
    }

    /// Transcode everything read through `encoding`.
    pub fn with_encoding(self, encoding: Encoding) -> Self {
        self.configure(|conduit| conduit.with_encoding(encoding))
    }

    /// Whether to rewind after a sequence is fully consumed.
    pub fn rewindable(self, rewindable: bool) -> Self {
        self.configure(|conduit| conduit.rewindable(rewindable))
    }

    /// Close the file once a sink finishes.
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

    /// Size of the file, if it is open and not empty.
    pub fn size(&self) -> Option<Size> {
        self.conduit.stream().size()
    }

    /// Unwrap the conduit.
    pub fn into_conduit(self) -> Conduit<W> {
        self.conduit
    }
}

impl<W> Deref for File<W> {
    type Target = Conduit<W>;

    fn deref(&self) -> &Self::Target {
        &self.conduit
    }
}

impl<W> DerefMut for File<W> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.conduit
    }
}
