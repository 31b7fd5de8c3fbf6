//! Fan-in across several streams.
//!
//! A [`Pool`] reads from whichever of its members become ready, the way a
//! supervisor drains a child's standard output and standard error together.
//! Every chunk comes back tagged with the id of the member it was read from.
//! A member which reaches end-of-stream yields one final empty chunk, then is
//! unwatched and closed.

use std::collections::VecDeque;
use std::fmt;

use bytes::Bytes;
use tracing::{debug, trace, warn};

use crate::encoding::Encoding;
use crate::frame::{self, Frame, FrameError};
use crate::reader::Reader;
use crate::stream::Stream;
use crate::wait::Pending;
use crate::watch::{Watch, WatchError};

/// Readiness already established by the pool's merged watch.
struct Resolved;

impl Pending for Resolved {
    fn ready(&mut self, _: &mut Stream) -> Result<bool, WatchError> {
        Ok(true)
    }
}

/// Several streams read through one watch.
///
/// ```rust
/// use std::io::Write;
/// use std::os::unix::net::UnixStream;
/// use std::time::Duration;
/// use sluice::pool::Pool;
/// use sluice::stream::Stream;
/// use sluice::watch::{SyncWatch, Watch};
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let (out, mut out_peer) = UnixStream::pair()?;
/// let (err, mut err_peer) = UnixStream::pair()?;
/// out_peer.write_all(b"done\n")?;
/// err_peer.write_all(b"warning\n")?;
/// drop((out_peer, err_peer));
///
/// let mut pool = Pool::new(SyncWatch::new().timeout_after(Duration::from_secs(1)))
///     .with("stdout", Stream::from_unix(out))
///     .with("stderr", Stream::from_unix(err));
///
/// let mut stdout = Vec::new();
/// for chunk in pool.chunks(1024) {
///     let (id, chunk) = chunk?;
///     if id == "stdout" {
///         stdout.extend_from_slice(&chunk);
///     }
/// }
/// assert_eq!(stdout, b"done\n");
/// assert!(pool.is_empty());
/// # Ok(())
/// # }
/// # example().unwrap();
/// ```
pub struct Pool<K, W> {
    watch: W,
    members: Vec<(K, Stream)>,
    encoding: Option<Encoding>,
    failure: Option<FrameError>,
}

impl<K: fmt::Debug, W: fmt::Debug> fmt::Debug for Pool<K, W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("watch", &self.watch)
            .field("members", &self.members)
            .field("encoding", &self.encoding)
            .field("failure", &self.failure)
            .finish()
    }
}

impl<K: Clone, W: Watch> Pool<K, W> {
    /// An empty pool waiting with `watch`.
    ///
    /// The watch is used as a template carrying the timeout; its members are
    /// replaced by the pool's streams on every round.
    pub fn new(watch: W) -> Self {
        Self {
            watch,
            members: Vec::new(),
            encoding: None,
            failure: None,
        }
    }

    /// Add a stream, identified by `id`.
    pub fn with(mut self, id: K, stream: Stream) -> Self {
        self.members.push((id, stream));
        self
    }

    /// Transcode every chunk through `encoding`.
    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = Some(encoding);
        self
    }

    /// Number of members still open.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether every member has been drained and closed.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Ids of the members still open, in insertion order.
    pub fn ids(&self) -> impl Iterator<Item = &K> {
        self.members.iter().map(|(id, _)| id)
    }

    /// Read one chunk of at most `size` bytes from every ready member.
    ///
    /// Members with buffered bytes or at end-of-stream are read without
    /// invoking the watch. Fails with [`FrameError::Unready`] when the watch
    /// times out with no member ready. An empty pool yields nothing.
    ///
    /// When one member fails, the chunks already read from other members in
    /// the same round are returned first and the failure is reported by the
    /// following call.
    ///
    /// # Panics
    ///
    /// `size` must be positive.
    pub fn read(&mut self, size: usize) -> Result<Vec<(K, Bytes)>, FrameError> {
        assert!(size > 0, "chunk size must be positive");
        if let Some(error) = self.failure.take() {
            return Err(error);
        }
        if self.members.is_empty() {
            return Ok(Vec::new());
        }

        let ready = self.ready()?;
        if ready.is_empty() {
            trace!(members = self.members.len(), "no pool member ready");
            return Err(FrameError::Unready);
        }

        let chunk = frame::chunk(size);
        let mut round = Vec::with_capacity(ready.len());
        let mut drained = Vec::new();
        let mut failure = None;
        for index in ready {
            let (id, stream) = &mut self.members[index];
            let mut reader = Reader::new(stream, Resolved).with_encoding(self.encoding);
            match chunk.decode(&mut reader) {
                Ok(data) => {
                    if data.is_empty() && stream.end() {
                        drained.push(index);
                    }
                    round.push((id.clone(), data));
                }
                Err(error) => {
                    debug!(handle = %stream.handle(), "pool member failed: {}", error);
                    failure = Some(error);
                    break;
                }
            }
        }

        for index in drained.into_iter().rev() {
            let (_, mut stream) = self.members.remove(index);
            debug!(handle = %stream.handle(), "pool member drained");
            if let Err(error) = stream.close() {
                warn!(handle = %stream.handle(), "closing drained pool member failed: {}", error);
            }
        }

        match failure {
            Some(error) if round.is_empty() => Err(error),
            Some(error) => {
                self.failure = Some(error);
                Ok(round)
            }
            None => Ok(round),
        }
    }

    /// Indices of ready members, ascending.
    fn ready(&self) -> Result<Vec<usize>, WatchError> {
        let immediate: Vec<usize> = self
            .members
            .iter()
            .enumerate()
            .filter(|(_, (_, stream))| stream.buffered() > 0 || stream.end())
            .map(|(index, _)| index)
            .collect();
        if !immediate.is_empty() {
            return Ok(immediate);
        }

        let ready = self
            .watch
            .clone()
            .clear()
            .for_read(self.members.iter().map(|(_, stream)| stream))
            .invoke()?;

        Ok(self
            .members
            .iter()
            .enumerate()
            .filter(|(_, (_, stream))| ready.is_readable(stream.handle()))
            .map(|(index, _)| index)
            .collect())
    }

    /// `(id, chunk)` pairs until every member is drained.
    ///
    /// The iterator ends after the first error.
    ///
    /// # Panics
    ///
    /// `size` must be positive.
    pub fn chunks(&mut self, size: usize) -> PoolChunks<'_, K, W> {
        assert!(size > 0, "chunk size must be positive");
        PoolChunks {
            pool: self,
            size,
            round: VecDeque::new(),
            done: false,
        }
    }

    /// Close every remaining member.
    pub fn close(&mut self) {
        for (_, mut stream) in self.members.drain(..) {
            if let Err(error) = stream.close() {
                warn!(handle = %stream.handle(), "closing pool member failed: {}", error);
            }
        }
    }
}

/// Iterator over pool chunks. See [`Pool::chunks`].
pub struct PoolChunks<'a, K, W> {
    pool: &'a mut Pool<K, W>,
    size: usize,
    round: VecDeque<(K, Bytes)>,
    done: bool,
}

impl<K: fmt::Debug, W: fmt::Debug> fmt::Debug for PoolChunks<'_, K, W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolChunks")
            .field("pool", &self.pool)
            .field("size", &self.size)
            .field("pending", &self.round.len())
            .finish()
    }
}

impl<K: Clone, W: Watch> Iterator for PoolChunks<'_, K, W> {
    type Item = Result<(K, Bytes), FrameError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.round.pop_front() {
                return Some(Ok(item));
            }
            if self.done || (self.pool.is_empty() && self.pool.failure.is_none()) {
                return None;
            }

            match self.pool.read(self.size) {
                Ok(round) => self.round.extend(round),
                Err(error) => {
                    self.done = true;
                    return Some(Err(error));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;
    use std::io::Write;
    use std::os::unix::net::UnixStream;
    use std::time::Duration;

    use crate::watch::SyncWatch;

    fn watch() -> SyncWatch {
        SyncWatch::new().timeout_after(Duration::from_millis(200))
    }

    #[test]
    fn fan_in_tags_chunks() {
        crate::fixtures::subscribe();
        let (out, mut out_peer) = UnixStream::pair().unwrap();
        let (err, mut err_peer) = UnixStream::pair().unwrap();

        let writer = std::thread::spawn(move || {
            for n in 0..5 {
                out_peer.write_all(format!("out {n}\n").as_bytes()).unwrap();
                err_peer.write_all(format!("err {n}\n").as_bytes()).unwrap();
                std::thread::sleep(Duration::from_millis(2));
            }
        });

        let mut pool = Pool::new(watch())
            .with(1, Stream::from_unix(out))
            .with(2, Stream::from_unix(err));

        let mut received: HashMap<i32, Vec<u8>> = HashMap::new();
        let mut sentinels: HashMap<i32, usize> = HashMap::new();
        for item in pool.chunks(3) {
            let (id, chunk) = item.unwrap();
            if chunk.is_empty() {
                *sentinels.entry(id).or_default() += 1;
            }
            received.entry(id).or_default().extend_from_slice(&chunk);
        }
        writer.join().unwrap();

        let expected = |tag: &str| -> Vec<u8> {
            (0..5).flat_map(|n| format!("{tag} {n}\n").into_bytes()).collect()
        };
        assert_eq!(received[&1], expected("out"));
        assert_eq!(received[&2], expected("err"));
        assert_eq!(sentinels, HashMap::from([(1, 1), (2, 1)]));
        assert!(pool.is_empty());
    }

    #[test]
    fn reads_only_ready_members() {
        let (quiet, _quiet_peer) = UnixStream::pair().unwrap();
        let (busy, mut busy_peer) = UnixStream::pair().unwrap();
        busy_peer.write_all(b"data").unwrap();

        let mut pool = Pool::new(watch())
            .with("quiet", Stream::from_unix(quiet))
            .with("busy", Stream::from_unix(busy));

        let round = pool.read(16).unwrap();
        assert_eq!(round, [("busy", Bytes::from_static(b"data"))]);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn drained_member_is_closed_and_removed() {
        let (left, peer) = UnixStream::pair().unwrap();
        drop(peer);

        let mut pool = Pool::new(watch()).with("gone", Stream::from_unix(left));
        let round = pool.read(8).unwrap();
        assert_eq!(round, [("gone", Bytes::new())]);
        assert!(pool.is_empty());
        assert!(pool.read(8).unwrap().is_empty());
        assert_eq!(pool.chunks(8).count(), 0);
    }

    #[test]
    fn silent_pool_times_out() {
        let (left, _peer) = UnixStream::pair().unwrap();
        let mut pool = Pool::new(SyncWatch::new().timeout_after(Duration::from_millis(10)))
            .with('a', Stream::from_unix(left));

        assert!(matches!(pool.read(8), Err(FrameError::Unready)));

        let mut chunks = pool.chunks(8);
        assert!(matches!(chunks.next(), Some(Err(FrameError::Unready))));
        assert!(chunks.next().is_none());
    }

    #[test]
    fn encoding_applies_to_members() {
        let (left, mut peer) = UnixStream::pair().unwrap();
        peer.write_all(b"\xe9t\xe9").unwrap();

        let mut pool = Pool::new(watch())
            .with_encoding(Encoding::Latin1)
            .with((), Stream::from_unix(left));
        let round = pool.read(16).unwrap();
        assert_eq!(round[0].1, "été");
    }

    #[test]
    fn failing_member_keeps_round() {
        let (good, mut good_peer) = UnixStream::pair().unwrap();
        let (bad, mut bad_peer) = UnixStream::pair().unwrap();
        good_peer.write_all(b"ok").unwrap();
        bad_peer.write_all(b"\xff").unwrap();

        let mut pool = Pool::new(watch())
            .with_encoding(Encoding::Utf8)
            .with("good", Stream::from_unix(good))
            .with("bad", Stream::from_unix(bad));

        let round = pool.read(16).unwrap();
        assert_eq!(round, [("good", Bytes::from_static(b"ok"))]);
        assert!(matches!(pool.read(16), Err(FrameError::Encoding(_))));
    }

    #[test]
    fn chunks_yield_round_before_failure() {
        let (good, mut good_peer) = UnixStream::pair().unwrap();
        let (bad, mut bad_peer) = UnixStream::pair().unwrap();
        good_peer.write_all(b"ok").unwrap();
        bad_peer.write_all(b"\xff").unwrap();

        let mut pool = Pool::new(watch())
            .with_encoding(Encoding::Utf8)
            .with("good", Stream::from_unix(good))
            .with("bad", Stream::from_unix(bad));

        let mut chunks = pool.chunks(16);
        assert_eq!(chunks.next().unwrap().unwrap(), ("good", Bytes::from_static(b"ok")));
        assert!(matches!(chunks.next(), Some(Err(FrameError::Encoding(_)))));
        assert!(chunks.next().is_none());
    }

    #[test]
    #[should_panic(expected = "chunk size must be positive")]
    fn zero_sized_read_panics() {
        let (left, _peer) = UnixStream::pair().unwrap();
        let mut pool = Pool::new(watch()).with(0, Stream::from_unix(left));
        let _ = pool.read(0);
    }
}
