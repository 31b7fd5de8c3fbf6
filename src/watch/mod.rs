//! Readiness multiplexing over sets of streams.
//!
//! A [`Watch`] holds an [`Interest`]: the sources to watch for reading, the
//! sources to watch for writing, and an optional timeout. Invoking the watch
//! resolves to the [`Ready`] subset of those sources. A timeout is a successful
//! resolution to an empty `Ready`, never an error.
//!
//! Two strategies implement the same contract:
//!
//! - [`SyncWatch`] blocks the calling thread in the platform's readiness
//!   primitive.
//! - [`AsyncWatch`] never touches the primitive. It hands a [`SuspendedState`]
//!   to an external [`Scheduler`] and resumes when the scheduler reports
//!   readiness. This is the only suspension point in the crate.
//!
//! Watches are values. Configuration methods consume the watch and return the
//! reconfigured copy, so a template watch can be cloned and specialized for
//! each operation.
//!
//! ```rust
//! use std::time::Duration;
//! use sluice::watch::{SyncWatch, Watch};
//!
//! let watch = SyncWatch::new().timeout_after(Duration::from_millis(10));
//! let ready = watch.invoke().unwrap();
//! assert!(ready.is_empty());
//! ```

use std::fmt;
use std::hash::{Hash, Hasher};
use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::stream::{Handle, Stream};

pub use self::suspend::{AsyncWatch, Resumption, Scheduler, SuspendedState};
pub use self::sync::SyncWatch;

#[cfg(feature = "driver")]
pub mod driver;
mod suspend;
mod sync;

/// Errors from resolving a [`Watch`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WatchError {
    /// The readiness primitive itself failed.
    #[error("readiness poll failed: {0}")]
    Poll(#[source] io::Error),

    /// The scheduler driving an [`AsyncWatch`] went away before resuming it.
    #[error("scheduler is no longer running")]
    SchedulerGone,
}

/// A member of a readiness set: either a byte stream or a listening server.
///
/// Members are compared by [`Handle`] alone.
#[derive(Debug, Clone, Copy)]
pub enum Source {
    /// A readable or writable byte stream.
    Stream(Handle),

    /// A listening socket which is readable when a connection is pending.
    Server(Handle),
}

impl Source {
    /// The handle identifying this source.
    pub fn handle(&self) -> Handle {
        match self {
            Source::Stream(handle) | Source::Server(handle) => *handle,
        }
    }
}

impl PartialEq for Source {
    fn eq(&self, other: &Self) -> bool {
        self.handle() == other.handle()
    }
}

impl Eq for Source {}

impl Hash for Source {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.handle().hash(state);
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Stream(handle) => write!(f, "stream({handle})"),
            Source::Server(handle) => write!(f, "server({handle})"),
        }
    }
}

/// Types which can be placed in a readiness set.
pub trait AsSource {
    /// The source identifying this value.
    fn source(&self) -> Source;
}

impl AsSource for Source {
    fn source(&self) -> Source {
        *self
    }
}

impl AsSource for Stream {
    fn source(&self) -> Source {
        Source::Stream(self.handle())
    }
}

impl<T: AsSource + ?Sized> AsSource for &T {
    fn source(&self) -> Source {
        (**self).source()
    }
}

impl<T: AsSource + ?Sized> AsSource for &mut T {
    fn source(&self) -> Source {
        (**self).source()
    }
}

fn insert_unique(set: &mut Vec<Source>, source: Source) {
    if !set.contains(&source) {
        set.push(source);
    }
}

/// A readiness request: read interest, write interest and an optional timeout.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Interest {
    read: Vec<Source>,
    write: Vec<Source>,
    timeout: Option<Duration>,
}

impl Interest {
    /// An empty request which would wait forever.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sources watched for reading.
    pub fn read(&self) -> &[Source] {
        &self.read
    }

    /// Sources watched for writing.
    pub fn write(&self) -> &[Source] {
        &self.write
    }

    /// The timeout, or `None` to wait forever.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Whether neither set has any members.
    pub fn is_empty(&self) -> bool {
        self.read.is_empty() && self.write.is_empty()
    }

    /// Add sources to the read set.
    pub fn for_read<I, S>(mut self, sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsSource,
    {
        for source in sources {
            insert_unique(&mut self.read, source.source());
        }
        self
    }

    /// Add sources to the write set.
    pub fn for_write<I, S>(mut self, sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsSource,
    {
        for source in sources {
            insert_unique(&mut self.write, source.source());
        }
        self
    }

    /// Resolve after `timeout` if nothing became ready.
    pub fn timeout_after(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Remove any timeout.
    pub fn wait_forever(mut self) -> Self {
        self.timeout = None;
        self
    }

    /// Remove a source from both sets. Removing an absent source does nothing.
    pub fn unwatch<S: AsSource>(mut self, source: S) -> Self {
        let source = source.source();
        self.read.retain(|member| *member != source);
        self.write.retain(|member| *member != source);
        self
    }

    /// Union both sets with `other`'s, keeping the shorter of the two timeouts.
    ///
    /// A request without a timeout loses to any request with one.
    pub fn merge(mut self, other: &Interest) -> Self {
        for source in &other.read {
            insert_unique(&mut self.read, *source);
        }
        for source in &other.write {
            insert_unique(&mut self.write, *source);
        }
        self.timeout = match (self.timeout, other.timeout) {
            (Some(left), Some(right)) => Some(left.min(right)),
            (left, right) => left.or(right),
        };
        self
    }

    /// Empty both sets. The timeout is kept.
    pub fn clear(mut self) -> Self {
        self.read.clear();
        self.write.clear();
        self
    }
}

/// The actionable subset of an [`Interest`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ready {
    read: Vec<Source>,
    write: Vec<Source>,
}

impl Ready {
    /// Build a ready set from its members.
    pub fn new<R, W>(read: R, write: W) -> Self
    where
        R: IntoIterator<Item = Source>,
        W: IntoIterator<Item = Source>,
    {
        let mut ready = Ready::default();
        for source in read {
            insert_unique(&mut ready.read, source);
        }
        for source in write {
            insert_unique(&mut ready.write, source);
        }
        ready
    }

    /// Sources ready for reading.
    pub fn read(&self) -> &[Source] {
        &self.read
    }

    /// Sources ready for writing.
    pub fn write(&self) -> &[Source] {
        &self.write
    }

    /// Whether nothing is ready, as after a timeout.
    pub fn is_empty(&self) -> bool {
        self.read.is_empty() && self.write.is_empty()
    }

    /// Whether the source with this handle is ready for reading.
    pub fn is_readable(&self, handle: Handle) -> bool {
        self.read.iter().any(|source| source.handle() == handle)
    }

    /// Whether the source with this handle is ready for writing.
    pub fn is_writable(&self, handle: Handle) -> bool {
        self.write.iter().any(|source| source.handle() == handle)
    }

    /// Keep only members also present in `interest`.
    pub(crate) fn intersect(&self, interest_read: &[Source], interest_write: &[Source]) -> Ready {
        Ready {
            read: self
                .read
                .iter()
                .filter(|source| interest_read.contains(source))
                .copied()
                .collect(),
            write: self
                .write
                .iter()
                .filter(|source| interest_write.contains(source))
                .copied()
                .collect(),
        }
    }
}

/// A readiness multiplexer.
///
/// Implementors provide access to their [`Interest`] and the [`Watch::invoke`]
/// strategy; the configuration methods are shared. `merge` takes another watch
/// of the same type, so strategies can never be mixed.
pub trait Watch: Clone + fmt::Debug {
    /// The current readiness request.
    fn interest(&self) -> &Interest;

    /// Mutable access to the readiness request.
    fn interest_mut(&mut self) -> &mut Interest;

    /// Resolve the request to the set of ready sources.
    ///
    /// An empty request resolves to an empty [`Ready`] immediately.
    fn invoke(&self) -> Result<Ready, WatchError>;

    /// Combine interest sets with `other`, keeping the shorter timeout.
    fn merge(mut self, other: &Self) -> Self {
        let interest = std::mem::take(self.interest_mut());
        *self.interest_mut() = interest.merge(other.interest());
        self
    }

    /// Add sources to the read set.
    fn for_read<I, S>(self, sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsSource,
    {
        self.configure(|interest| interest.for_read(sources))
    }

    /// Add sources to the write set.
    fn for_write<I, S>(self, sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsSource,
    {
        self.configure(|interest| interest.for_write(sources))
    }

    /// Resolve empty after `timeout` when nothing becomes ready.
    fn timeout_after(self, timeout: Duration) -> Self {
        self.configure(|interest| interest.timeout_after(timeout))
    }

    /// Wait without a timeout.
    fn wait_forever(self) -> Self {
        self.configure(Interest::wait_forever)
    }

    /// Remove a source from both sets.
    fn unwatch<S: AsSource>(self, source: S) -> Self {
        self.configure(|interest| interest.unwatch(source))
    }

    /// Empty both sets, keeping the timeout.
    fn clear(self) -> Self {
        self.configure(Interest::clear)
    }

    #[doc(hidden)]
    fn configure<F>(mut self, f: F) -> Self
    where
        F: FnOnce(Interest) -> Interest,
    {
        let interest = std::mem::take(self.interest_mut());
        *self.interest_mut() = f(interest);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::os::unix::net::UnixStream;

    use static_assertions::assert_impl_all;

    assert_impl_all!(WatchError: std::error::Error, Send, Sync);
    assert_impl_all!(Ready: Send, Sync);

    fn stream() -> (Stream, UnixStream) {
        let (left, right) = UnixStream::pair().unwrap();
        (Stream::from_unix(left), right)
    }

    #[test]
    fn sources_compare_by_handle() {
        let (a, _a) = stream();
        let handle = a.handle();
        assert_eq!(Source::Stream(handle), Source::Server(handle));
        assert_eq!(a.source(), Source::Stream(handle));
    }

    #[test]
    fn builders_deduplicate() {
        let (a, _a) = stream();
        let (b, _b) = stream();
        let interest = Interest::new()
            .for_read([&a, &b, &a])
            .for_write([&b, &b]);

        assert_eq!(interest.read().len(), 2);
        assert_eq!(interest.write().len(), 1);
    }

    #[test]
    fn merge_unions_and_keeps_shorter_timeout() {
        let (a, _a) = stream();
        let (b, _b) = stream();

        let left = Interest::new()
            .for_read([&a])
            .timeout_after(Duration::from_millis(50));
        let right = Interest::new()
            .for_read([&a, &b])
            .for_write([&b])
            .timeout_after(Duration::from_millis(10));

        let merged = left.merge(&right);
        assert_eq!(merged.read(), &[a.source(), b.source()]);
        assert_eq!(merged.write(), &[b.source()]);
        assert_eq!(merged.timeout(), Some(Duration::from_millis(10)));
    }

    #[test]
    fn merge_prefers_any_timeout_over_none() {
        let forever = Interest::new();
        let bounded = Interest::new().timeout_after(Duration::from_millis(5));

        assert_eq!(
            forever.clone().merge(&bounded).timeout(),
            Some(Duration::from_millis(5))
        );
        assert_eq!(
            bounded.merge(&forever).timeout(),
            Some(Duration::from_millis(5))
        );
    }

    #[test]
    fn unwatch_is_idempotent() {
        let (a, _a) = stream();
        let (b, _b) = stream();
        let interest = Interest::new().for_read([&a, &b]).for_write([&a]);

        let once = interest.unwatch(&a);
        let twice = once.clone().unwatch(&a);
        assert_eq!(once, twice);
        assert_eq!(twice.read(), &[b.source()]);
        assert!(twice.write().is_empty());
    }

    #[test]
    fn clear_keeps_timeout() {
        let (a, _a) = stream();
        let interest = Interest::new()
            .for_read([&a])
            .timeout_after(Duration::from_secs(1))
            .clear();

        assert!(interest.is_empty());
        assert_eq!(interest.timeout(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn ready_intersection() {
        let (a, _a) = stream();
        let (b, _b) = stream();
        let ready = Ready::new([a.source(), b.source()], [b.source()]);

        let narrowed = ready.intersect(&[b.source()], &[]);
        assert!(narrowed.is_readable(b.handle()));
        assert!(!narrowed.is_readable(a.handle()));
        assert!(narrowed.write().is_empty());
    }
}
