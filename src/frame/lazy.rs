use super::{Frame, FrameError};
use crate::reader::Input;

/// An unbounded sequence of decode attempts. See
/// [`FrameExt::lazy`](super::FrameExt::lazy).
///
/// Each item is decoded only when requested. The iterator never returns
/// `None`; the caller decides where the sequence ends.
#[derive(Debug)]
pub struct Lazy<F, I> {
    frame: F,
    input: I,
}

impl<F, I> Lazy<F, I> {
    pub(super) fn new(frame: F, input: I) -> Self {
        Self { frame, input }
    }

    /// Stop the sequence and recover the input.
    pub fn into_input(self) -> I {
        self.input
    }
}

impl<F: Frame, I: Input> Iterator for Lazy<F, I> {
    type Item = Result<F::Output, FrameError>;

    fn next(&mut self) -> Option<Self::Item> {
        Some(self.frame.decode(&mut self.input))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (usize::MAX, None)
    }
}
