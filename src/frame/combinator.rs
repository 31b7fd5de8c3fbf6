use std::fmt;

use super::{Frame, FrameError};
use crate::reader::{Input, Window};

/// Transforms a decoded value. See [`FrameExt::map`](super::FrameExt::map).
#[derive(Clone)]
pub struct Map<F, M> {
    frame: F,
    f: M,
}

impl<F, M> Map<F, M> {
    pub(super) fn new(frame: F, f: M) -> Self {
        Self { frame, f }
    }
}

impl<F: fmt::Debug, M> fmt::Debug for Map<F, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Map")
            .field("frame", &self.frame)
            .finish_non_exhaustive()
    }
}

impl<F, M, U> Frame for Map<F, M>
where
    F: Frame,
    M: Fn(F::Output) -> U,
{
    type Output = U;

    fn decode(&self, input: &mut dyn Input) -> Result<U, FrameError> {
        self.frame.decode(input).map(&self.f)
    }
}

/// Dependent sequential decoding. See
/// [`FrameExt::flat_map`](super::FrameExt::flat_map).
#[derive(Clone)]
pub struct FlatMap<F, M> {
    frame: F,
    f: M,
}

impl<F, M> FlatMap<F, M> {
    pub(super) fn new(frame: F, f: M) -> Self {
        Self { frame, f }
    }
}

impl<F: fmt::Debug, M> fmt::Debug for FlatMap<F, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlatMap")
            .field("frame", &self.frame)
            .finish_non_exhaustive()
    }
}

impl<F, M, G> Frame for FlatMap<F, M>
where
    F: Frame,
    M: Fn(F::Output) -> G,
    G: Frame,
{
    type Output = G::Output;

    fn decode(&self, input: &mut dyn Input) -> Result<G::Output, FrameError> {
        let value = self.frame.decode(input)?;
        (self.f)(value).decode(input)
    }
}

/// Rejects values which fail a predicate. See
/// [`FrameExt::filter`](super::FrameExt::filter).
#[derive(Clone)]
pub struct Filter<F, P> {
    frame: F,
    predicate: P,
}

impl<F, P> Filter<F, P> {
    pub(super) fn new(frame: F, predicate: P) -> Self {
        Self { frame, predicate }
    }
}

impl<F: fmt::Debug, P> fmt::Debug for Filter<F, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Filter")
            .field("frame", &self.frame)
            .finish_non_exhaustive()
    }
}

impl<F, P> Frame for Filter<F, P>
where
    F: Frame,
    P: Fn(&F::Output) -> bool,
{
    type Output = F::Output;

    fn decode(&self, input: &mut dyn Input) -> Result<F::Output, FrameError> {
        let value = self.frame.decode(input)?;
        if (self.predicate)(&value) {
            Ok(value)
        } else {
            Err(FrameError::Rejected)
        }
    }
}

/// Decodes a frame against a pre-read window of bytes. See
/// [`buffer`](super::buffer).
///
/// The window is read in full before the inner frame runs, so the outer input
/// always advances by the window length (or to end-of-stream), no matter how
/// much of the window the inner frame consumes. The length counts source
/// bytes; the window is transcoded as a whole once read.
#[derive(Debug, Clone)]
pub struct Buffer<F> {
    len: usize,
    frame: F,
}

impl<F> Buffer<F> {
    pub(super) fn new(len: usize, frame: F) -> Self {
        Self { len, frame }
    }
}

impl<F: Frame> Frame for Buffer<F> {
    type Output = F::Output;

    fn decode(&self, input: &mut dyn Input) -> Result<F::Output, FrameError> {
        let window = input.read_window(self.len)?;
        tracing::trace!(len = self.len, filled = window.len(), "buffered window");
        self.frame.decode(&mut Window::new(window))
    }
}

/// Decodes a tuple of frames in order and combines the results. See
/// [`compose`](super::compose).
#[derive(Clone)]
pub struct Compose<S, M> {
    frames: S,
    f: M,
}

impl<S, M> Compose<S, M> {
    pub(super) fn new(f: M, frames: S) -> Self {
        Self { frames, f }
    }
}

impl<S: fmt::Debug, M> fmt::Debug for Compose<S, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Compose")
            .field("frames", &self.frames)
            .finish_non_exhaustive()
    }
}

impl<S, M, U> Frame for Compose<S, M>
where
    S: Frame,
    M: Fn(S::Output) -> U,
{
    type Output = U;

    fn decode(&self, input: &mut dyn Input) -> Result<U, FrameError> {
        self.frames.decode(input).map(&self.f)
    }
}

// Tuples of frames decode left to right into tuples of values.
macro_rules! tuple_frame {
    ($($name:ident),+) => {
        impl<$($name: Frame),+> Frame for ($($name,)+) {
            type Output = ($($name::Output,)+);

            #[allow(non_snake_case)]
            fn decode(&self, input: &mut dyn Input) -> Result<Self::Output, FrameError> {
                let ($($name,)+) = self;
                Ok(($($name.decode(input)?,)+))
            }
        }
    };
}

tuple_frame!(A);
tuple_frame!(A, B);
tuple_frame!(A, B, C);
tuple_frame!(A, B, C, D);
tuple_frame!(A, B, C, D, E);
tuple_frame!(A, B, C, D, E, G);
tuple_frame!(A, B, C, D, E, G, H);
tuple_frame!(A, B, C, D, E, G, H, J);
