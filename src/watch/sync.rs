//! Blocking readiness through `poll(2)`.

use std::io;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use super::{Interest, Ready, Source, Watch, WatchError};

const READABLE: libc::c_short = libc::POLLIN | libc::POLLHUP | libc::POLLERR | libc::POLLNVAL;
const WRITABLE: libc::c_short = libc::POLLOUT | libc::POLLHUP | libc::POLLERR | libc::POLLNVAL;

/// A watch which blocks the calling thread until readiness or timeout.
///
/// Hang-up, error and invalid-descriptor conditions count as ready, so that
/// the read or write which follows reports the condition itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncWatch {
    interest: Interest,
}

impl SyncWatch {
    /// A watch with empty sets and no timeout.
    pub fn new() -> Self {
        Self::default()
    }
}

impl From<Interest> for SyncWatch {
    fn from(interest: Interest) -> Self {
        Self { interest }
    }
}

/// Milliseconds left until `deadline`, rounded up so that short timeouts
/// still block instead of degrading into a busy poll.
fn remaining_millis(deadline: Option<Instant>) -> libc::c_int {
    let Some(deadline) = deadline else {
        return -1;
    };

    let remaining = deadline.saturating_duration_since(Instant::now());
    let millis = remaining.as_nanos().div_ceil(1_000_000);
    millis.min(libc::c_int::MAX as u128) as libc::c_int
}

fn descriptors(interest: &Interest) -> Vec<libc::pollfd> {
    let mut fds: Vec<libc::pollfd> = Vec::with_capacity(interest.read().len() + interest.write().len());
    let mut register = |source: &Source, events: libc::c_short| {
        let fd = source.handle().raw();
        match fds.iter_mut().find(|pollfd| pollfd.fd == fd) {
            Some(pollfd) => pollfd.events |= events,
            None => fds.push(libc::pollfd {
                fd,
                events,
                revents: 0,
            }),
        }
    };

    for source in interest.read() {
        register(source, libc::POLLIN);
    }
    for source in interest.write() {
        register(source, libc::POLLOUT);
    }
    fds
}

fn revents(fds: &[libc::pollfd], source: &Source) -> libc::c_short {
    let fd = source.handle().raw();
    fds.iter()
        .find(|pollfd| pollfd.fd == fd)
        .map(|pollfd| pollfd.revents)
        .unwrap_or(0)
}

impl Watch for SyncWatch {
    fn interest(&self) -> &Interest {
        &self.interest
    }

    fn interest_mut(&mut self) -> &mut Interest {
        &mut self.interest
    }

    fn invoke(&self) -> Result<Ready, WatchError> {
        let interest = &self.interest;
        if interest.is_empty() {
            return Ok(Ready::default());
        }

        let _span = tracing::trace_span!(
            "watch.invoke",
            strategy = "sync",
            read = interest.read().len(),
            write = interest.write().len(),
            timeout = ?interest.timeout()
        )
        .entered();

        let mut fds = descriptors(interest);
        let deadline = interest
            .timeout()
            .map(|timeout| Instant::now() + timeout.min(Duration::from_secs(u32::MAX as u64)));

        loop {
            let timeout = remaining_millis(deadline);
            // SAFETY: `fds` is a live, exclusively borrowed buffer of `fds.len()` entries.
            let rc = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout) };
            if rc >= 0 {
                break;
            }

            let error = io::Error::last_os_error();
            if error.kind() == io::ErrorKind::Interrupted {
                trace!("poll interrupted, retrying");
                continue;
            }

            debug!("poll failed: {}", error);
            return Err(WatchError::Poll(error));
        }

        let ready = Ready::new(
            interest
                .read()
                .iter()
                .filter(|source| revents(&fds, source) & READABLE != 0)
                .copied()
                .collect::<Vec<_>>(),
            interest
                .write()
                .iter()
                .filter(|source| revents(&fds, source) & WRITABLE != 0)
                .copied()
                .collect::<Vec<_>>(),
        );

        trace!(
            read = ready.read().len(),
            write = ready.write().len(),
            "readiness resolved"
        );
        Ok(ready)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Write;
    use std::os::unix::net::UnixStream;

    use crate::stream::Stream;
    use crate::watch::AsSource;

    fn pair() -> (Stream, UnixStream) {
        let (left, right) = UnixStream::pair().unwrap();
        (Stream::from_unix(left), right)
    }

    #[test]
    fn empty_interest_resolves_without_waiting() {
        let start = Instant::now();
        let ready = SyncWatch::new().invoke().unwrap();
        assert!(ready.is_empty());
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn readable_after_peer_writes() {
        crate::fixtures::subscribe();
        let (stream, mut peer) = pair();
        let watch = SyncWatch::new()
            .for_read([&stream])
            .timeout_after(Duration::from_secs(1));

        peer.write_all(b"x").unwrap();
        let ready = watch.invoke().unwrap();
        assert!(ready.is_readable(stream.handle()));
    }

    #[test]
    fn writable_socket_is_ready() {
        let (stream, _peer) = pair();
        let ready = SyncWatch::new()
            .for_write([&stream])
            .timeout_after(Duration::ZERO)
            .invoke()
            .unwrap();
        assert!(ready.is_writable(stream.handle()));
        assert!(ready.read().is_empty());
    }

    #[test]
    fn zero_timeout_polls() {
        let (stream, _peer) = pair();
        let start = Instant::now();
        let ready = SyncWatch::new()
            .for_read([&stream])
            .timeout_after(Duration::ZERO)
            .invoke()
            .unwrap();
        assert!(ready.is_empty());
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn hang_up_counts_as_readable() {
        let (stream, peer) = pair();
        drop(peer);
        let ready = SyncWatch::new()
            .for_read([&stream])
            .timeout_after(Duration::from_secs(1))
            .invoke()
            .unwrap();
        assert!(ready.is_readable(stream.handle()));
    }

    #[test]
    fn merge_resolves_at_shorter_timeout() {
        let (a, _peer_a) = pair();
        let (b, _peer_b) = pair();

        let short = SyncWatch::new()
            .for_read([&a])
            .timeout_after(Duration::from_millis(10));
        let long = SyncWatch::new()
            .for_read([&b])
            .timeout_after(Duration::from_millis(50));

        let merged = short.merge(&long);
        assert_eq!(merged.interest().read(), &[a.source(), b.source()]);

        let start = Instant::now();
        let ready = merged.invoke().unwrap();
        let elapsed = start.elapsed();

        assert!(ready.is_empty());
        assert!(elapsed >= Duration::from_millis(10), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(45), "{elapsed:?}");
    }

    #[test]
    fn same_stream_in_both_sets() {
        let (stream, mut peer) = pair();
        peer.write_all(b"x").unwrap();

        let ready = SyncWatch::new()
            .for_read([&stream])
            .for_write([&stream])
            .timeout_after(Duration::from_secs(1))
            .invoke()
            .unwrap();
        assert!(ready.is_readable(stream.handle()));
        assert!(ready.is_writable(stream.handle()));
    }

    #[test]
    fn unwatched_stream_is_ignored() {
        let (stream, mut peer) = pair();
        peer.write_all(b"x").unwrap();

        let ready = SyncWatch::new()
            .for_read([&stream])
            .unwatch(&stream)
            .timeout_after(Duration::ZERO)
            .invoke()
            .unwrap();
        assert!(ready.is_empty());
    }
}
