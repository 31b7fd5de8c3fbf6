//! Cooperative readiness through an external scheduler.
//!
//! An [`AsyncWatch`] never calls the readiness primitive. When invoked, it
//! captures its interest in a [`SuspendedState`] and hands that to a
//! [`Scheduler`], which parks the caller until it has a [`Ready`] set to
//! resume with. The watch then decides whether the resumption satisfies it:
//!
//! 1. Any overlap between the resumed set and the interest sets resolves the
//!    watch with that overlap.
//! 2. Otherwise, if the elapsed time exceeds the timeout, the watch resolves
//!    empty.
//! 3. Otherwise the same state is handed back to the scheduler.
//!
//! The decision is a pure function of the state, the resumed set and the
//! current time ([`SuspendedState::resume`]), so schedulers and tests can drive
//! it without threads.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::trace;

use super::{Interest, Ready, Source, Watch, WatchError};
use crate::clock::{Clock, SystemClock};

/// The value handed to a scheduler while a watch is suspended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuspendedState {
    since: Instant,
    timeout: Option<Duration>,
    read: Vec<Source>,
    write: Vec<Source>,
}

/// The outcome of resuming a [`SuspendedState`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resumption {
    /// The watch is satisfied with this ready set. Empty after a timeout.
    Resolved(Ready),

    /// The watch must be suspended again with this state.
    Suspended(SuspendedState),
}

impl SuspendedState {
    /// Capture `interest` as of `since`.
    pub fn new(interest: &Interest, since: Instant) -> Self {
        Self {
            since,
            timeout: interest.timeout(),
            read: interest.read().to_vec(),
            write: interest.write().to_vec(),
        }
    }

    /// When the watch was first suspended.
    pub fn since(&self) -> Instant {
        self.since
    }

    /// The watch's timeout, if any.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Sources the suspended watch wants to read.
    pub fn read(&self) -> &[Source] {
        &self.read
    }

    /// Sources the suspended watch wants to write.
    pub fn write(&self) -> &[Source] {
        &self.write
    }

    /// The deadline after which the watch resolves empty, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.timeout.map(|timeout| self.since + timeout)
    }

    /// The interest this state was captured from.
    pub fn interest(&self) -> Interest {
        let interest = Interest::new()
            .for_read(self.read.iter().copied())
            .for_write(self.write.iter().copied());
        match self.timeout {
            Some(timeout) => interest.timeout_after(timeout),
            None => interest,
        }
    }

    /// Whether the time elapsed at `now` exceeds the timeout.
    pub fn expired(&self, now: Instant) -> bool {
        self.timeout
            .is_some_and(|timeout| now.saturating_duration_since(self.since) > timeout)
    }

    /// Decide what a resumption with `ready` at `now` means for this watch.
    pub fn resume(self, ready: &Ready, now: Instant) -> Resumption {
        let overlap = ready.intersect(&self.read, &self.write);
        if !overlap.is_empty() {
            return Resumption::Resolved(overlap);
        }

        if self.expired(now) {
            trace!(timeout = ?self.timeout, "suspended watch timed out");
            return Resumption::Resolved(Ready::default());
        }

        Resumption::Suspended(self)
    }
}

/// An external cooperative scheduler.
///
/// `suspend` is the single suspension point: it parks the calling fiber until
/// the scheduler has a [`Ready`] set for it, then returns that set. The
/// scheduler does not need to filter the set; [`AsyncWatch`] intersects it with
/// its own interest and suspends again when nothing relevant is ready.
pub trait Scheduler: Send + Sync + fmt::Debug {
    /// Park the caller with `state` until resumed.
    fn suspend(&self, state: &SuspendedState) -> Result<Ready, WatchError>;
}

/// A watch which suspends through a [`Scheduler`] instead of blocking.
#[derive(Debug, Clone)]
pub struct AsyncWatch {
    interest: Interest,
    scheduler: Arc<dyn Scheduler>,
    clock: Arc<dyn Clock>,
}

impl AsyncWatch {
    /// A watch suspending through `scheduler`, timed by the system clock.
    pub fn new(scheduler: Arc<dyn Scheduler>) -> Self {
        Self {
            interest: Interest::new(),
            scheduler,
            clock: Arc::new(SystemClock),
        }
    }

    /// Use `clock` to measure elapsed time against the timeout.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn same_scheduler(&self, other: &AsyncWatch) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.scheduler), Arc::as_ptr(&other.scheduler))
    }
}

impl Watch for AsyncWatch {
    fn interest(&self) -> &Interest {
        &self.interest
    }

    fn interest_mut(&mut self) -> &mut Interest {
        &mut self.interest
    }

    /// Merge with another async watch.
    ///
    /// # Panics
    ///
    /// Both watches must suspend through the same scheduler.
    fn merge(mut self, other: &Self) -> Self {
        assert!(
            self.same_scheduler(other),
            "cannot merge watches driven by different schedulers"
        );
        self.interest = std::mem::take(&mut self.interest).merge(&other.interest);
        self
    }

    fn invoke(&self) -> Result<Ready, WatchError> {
        if self.interest.is_empty() {
            return Ok(Ready::default());
        }

        let _span = tracing::trace_span!(
            "watch.invoke",
            strategy = "async",
            read = self.interest.read().len(),
            write = self.interest.write().len(),
            timeout = ?self.interest.timeout()
        )
        .entered();

        let mut state = SuspendedState::new(&self.interest, self.clock.now());
        loop {
            trace!("suspending");
            let ready = self.scheduler.suspend(&state)?;
            match state.resume(&ready, self.clock.now()) {
                Resumption::Resolved(ready) => {
                    trace!(read = ready.read().len(), write = ready.write().len(), "resumed");
                    return Ok(ready);
                }
                Resumption::Suspended(again) => state = again,
            }
        }
    }
}
