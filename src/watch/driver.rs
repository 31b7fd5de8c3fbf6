//! A tokio-backed scheduler for [`AsyncWatch`](super::AsyncWatch).
//!
//! [`channel`] splits a scheduler into two halves. The [`ChannelScheduler`] is
//! handed to watches; each suspension sends a [`Parked`] fiber over a channel
//! and blocks the suspending thread until it is resumed. The [`Driver`] is the
//! scheduler side, a [`futures::Stream`] of parked fibers which an async task
//! resumes with whatever [`Ready`] set it sees fit.
//!
//! Fibers must run outside the async runtime, on a plain thread or through
//! [`tokio::task::spawn_blocking`], since they block while parked.
//!
//! [`Driver::serve`] is a complete driver loop which resolves each parked fiber
//! by polling the platform readiness primitive on the blocking pool.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

use super::{Ready, Scheduler, SuspendedState, SyncWatch, Watch, WatchError};

/// Create a connected scheduler and driver. `capacity` bounds the number of
/// fibers which can be parked before suspending blocks on the channel.
pub fn channel(capacity: usize) -> (ChannelScheduler, Driver) {
    let (tx, rx) = mpsc::channel(capacity);
    (ChannelScheduler { tx }, Driver { rx })
}

/// The fiber-side half of a [`channel`].
#[derive(Debug, Clone)]
pub struct ChannelScheduler {
    tx: mpsc::Sender<Parked>,
}

impl Scheduler for ChannelScheduler {
    fn suspend(&self, state: &SuspendedState) -> Result<Ready, WatchError> {
        let (reply, resumed) = oneshot::channel();
        self.tx
            .blocking_send(Parked {
                state: state.clone(),
                reply,
            })
            .map_err(|_| WatchError::SchedulerGone)?;
        resumed
            .blocking_recv()
            .map_err(|_| WatchError::SchedulerGone)?
    }
}

/// A suspended fiber waiting to be resumed.
#[derive(Debug)]
pub struct Parked {
    state: SuspendedState,
    reply: oneshot::Sender<Result<Ready, WatchError>>,
}

impl Parked {
    /// What the fiber is waiting for.
    pub fn state(&self) -> &SuspendedState {
        &self.state
    }

    /// Resume the fiber with `ready`. A fiber which has gone away is ignored.
    pub fn resume(self, ready: Ready) {
        self.settle(Ok(ready));
    }

    /// Resume the fiber with a failure, which its `invoke` returns as is.
    pub fn fail(self, error: WatchError) {
        self.settle(Err(error));
    }

    fn settle(self, outcome: Result<Ready, WatchError>) {
        if self.reply.send(outcome).is_err() {
            debug!("parked fiber went away before resumption");
        }
    }
}

/// The scheduler-side half of a [`channel`].
#[derive(Debug)]
pub struct Driver {
    rx: mpsc::Receiver<Parked>,
}

impl Driver {
    /// The next parked fiber, or `None` once every scheduler handle is dropped.
    pub async fn next(&mut self) -> Option<Parked> {
        self.rx.recv().await
    }

    /// Resolve parked fibers until every scheduler handle is dropped.
    ///
    /// Each fiber is polled for at most `slice` (or its own deadline, if
    /// sooner) and then resumed with whatever became ready, possibly nothing.
    /// The fiber's watch decides whether to resolve or park again. A failed
    /// poll is handed to the fiber as its error.
    pub async fn serve(mut self, slice: Duration) {
        while let Some(parked) = self.next().await {
            tokio::spawn(resolve(parked, slice));
        }
        trace!("driver finished");
    }
}

async fn resolve(parked: Parked, slice: Duration) {
    let state = parked.state();
    let budget = match state.deadline() {
        Some(deadline) => slice.min(deadline.saturating_duration_since(Instant::now())),
        None => slice,
    };

    let watch = SyncWatch::from(state.interest()).timeout_after(budget);
    let outcome = flatten(tokio::task::spawn_blocking(move || watch.invoke()).await);
    parked.settle(outcome);
}

/// Readiness failures are handed to the fiber, never replaced by an empty set.
fn flatten(
    joined: Result<Result<Ready, WatchError>, tokio::task::JoinError>,
) -> Result<Ready, WatchError> {
    match joined {
        Ok(Ok(ready)) => Ok(ready),
        Ok(Err(error)) => {
            warn!("readiness poll failed in driver: {}", error);
            Err(error)
        }
        Err(error) => {
            warn!("readiness poll panicked in driver: {}", error);
            Err(WatchError::Poll(io::Error::other(error.to_string())))
        }
    }
}

impl futures::Stream for Driver {
    type Item = Parked;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Write;
    use std::os::unix::net::UnixStream;
    use std::sync::Arc;

    use futures::StreamExt as _;

    use crate::stream::Stream;
    use crate::watch::{AsSource, AsyncWatch};

    use static_assertions::assert_impl_all;

    assert_impl_all!(ChannelScheduler: Scheduler, Send, Sync);
    assert_impl_all!(Driver: futures::Stream, Send);

    #[tokio::test(flavor = "multi_thread")]
    async fn driver_resumes_parked_fiber() {
        crate::fixtures::subscribe();
        let (scheduler, mut driver) = channel(4);
        let (left, right) = UnixStream::pair().unwrap();
        let stream = Stream::from_unix(left);
        let source = stream.source();

        let fiber = tokio::task::spawn_blocking(move || {
            let watch = AsyncWatch::new(Arc::new(scheduler)).for_read([&stream]);
            watch.invoke()
        });

        let parked = driver.next().await.expect("fiber parks");
        assert_eq!(parked.state().read(), &[source]);
        parked.resume(Ready::new([source], []));

        let ready = fiber.await.unwrap().unwrap();
        assert!(ready.is_readable(source.handle()));
        drop(right);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn driver_as_stream() {
        let (scheduler, driver) = channel(1);
        let (left, _right) = UnixStream::pair().unwrap();
        let stream = Stream::from_unix(left);
        let source = stream.source();

        let fiber = tokio::task::spawn_blocking(move || {
            AsyncWatch::new(Arc::new(scheduler))
                .for_write([&stream])
                .invoke()
        });

        let mut driver = driver.take(1);
        let parked = driver.next().await.expect("fiber parks");
        parked.resume(Ready::new([], [source]));
        assert!(fiber.await.unwrap().unwrap().is_writable(source.handle()));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn serve_polls_readiness() {
        let (scheduler, driver) = channel(4);
        let server = tokio::spawn(driver.serve(Duration::from_millis(20)));

        let (left, mut right) = UnixStream::pair().unwrap();
        let stream = Stream::from_unix(left);
        let handle = stream.handle();

        let fiber = tokio::task::spawn_blocking(move || {
            AsyncWatch::new(Arc::new(scheduler))
                .for_read([&stream])
                .timeout_after(Duration::from_secs(5))
                .invoke()
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        right.write_all(b"wake").unwrap();

        let ready = fiber.await.unwrap().unwrap();
        assert!(ready.is_readable(handle));

        // The fiber dropped the last scheduler handle, so the driver winds down.
        server.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn serve_respects_timeouts() {
        let (scheduler, driver) = channel(4);
        tokio::spawn(driver.serve(Duration::from_millis(5)));

        let (left, _right) = UnixStream::pair().unwrap();
        let stream = Stream::from_unix(left);

        let start = Instant::now();
        let ready = tokio::task::spawn_blocking(move || {
            AsyncWatch::new(Arc::new(scheduler))
                .for_read([&stream])
                .timeout_after(Duration::from_millis(30))
                .invoke()
        })
        .await
        .unwrap()
        .unwrap();

        assert!(ready.is_empty());
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failed_poll_reaches_fiber() {
        let (scheduler, mut driver) = channel(1);
        let (left, _right) = UnixStream::pair().unwrap();
        let stream = Stream::from_unix(left);

        let fiber = tokio::task::spawn_blocking(move || {
            AsyncWatch::new(Arc::new(scheduler))
                .for_read([&stream])
                .timeout_after(Duration::from_millis(10))
                .invoke()
        });

        let parked = driver.next().await.expect("fiber parks");
        parked.fail(WatchError::Poll(io::Error::from_raw_os_error(libc::EINVAL)));

        match fiber.await.unwrap() {
            Err(WatchError::Poll(error)) => assert_eq!(error.raw_os_error(), Some(libc::EINVAL)),
            other => panic!("poll failure must surface, got {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn driver_forwards_poll_errors() {
        let failed = tokio::task::spawn_blocking(|| -> Result<Ready, WatchError> {
            Err(WatchError::Poll(io::Error::from_raw_os_error(libc::EINVAL)))
        })
        .await;
        assert!(matches!(flatten(failed), Err(WatchError::Poll(_))));

        let panicked = tokio::task::spawn_blocking(|| -> Result<Ready, WatchError> {
            panic!("poll thread died")
        })
        .await;
        assert!(matches!(flatten(panicked), Err(WatchError::Poll(_))));

        let ready = tokio::task::spawn_blocking(|| Ok(Ready::default())).await;
        assert!(flatten(ready).unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn dropped_driver_fails_fiber() {
        let (scheduler, driver) = channel(1);
        drop(driver);

        let (left, _right) = UnixStream::pair().unwrap();
        let stream = Stream::from_unix(left);
        let result = tokio::task::spawn_blocking(move || {
            AsyncWatch::new(Arc::new(scheduler))
                .for_read([&stream])
                .invoke()
        })
        .await
        .unwrap();

        assert!(matches!(result, Err(WatchError::SchedulerGone)));
    }
}
