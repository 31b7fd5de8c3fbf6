//! # Sluice: readiness-aware byte streams and composable frame decoders
//!
//! Sluice wraps files, pipes, sockets and the standard streams in a single
//! [`Stream`](stream::Stream) type, multiplexes them for readiness through a
//! [`Watch`](watch::Watch), and decodes structured data out of them with a small
//! algebra of [`Frame`](frame::Frame)s.
//!
//! ## Architecture Overview
//!
//! The crate is layered bottom-up:
//!
//! - **Streams** own one OS resource each and expose chunk and line reads,
//!   writes, seeking and an idempotent close.
//! - **Watches** answer "which of these streams can be read or written now?",
//!   either by blocking in `poll(2)` ([`SyncWatch`](watch::SyncWatch)) or by
//!   suspending into a cooperative scheduler
//!   ([`AsyncWatch`](watch::AsyncWatch)).
//! - **Frames** are pure decoders pulling chunks and lines from an
//!   [`Input`](reader::Input). They compose with `map`, `flat_map`, `filter`,
//!   `buffer` and `compose`, and can be reused across any number of inputs.
//! - **Façades** bind a stream to a watch: [`Conduit`](conduit::Conduit) and its
//!   [`File`](file::File) and [`Socket`](socket::Socket) flavors decode chunks,
//!   lines and frames and sink chunks back out; [`Pool`](pool::Pool) fans in
//!   across several streams; [`Server`](socket::Server) and
//!   [`ServerPool`](socket::ServerPool) accept sockets.
//!
//! Resources are opened through an explicit [`Capabilities`](cap::Capabilities)
//! context rather than through any global.
//!
//! ## Example
//!
//! ```rust
//! use std::time::Duration;
//! use bytes::Bytes;
//! use sluice::cap::Capabilities;
//! use sluice::frame::{self, FrameExt};
//! use sluice::watch::Watch;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let caps = Capabilities::new();
//! let watch = caps.sync_watch().timeout_after(Duration::from_secs(1));
//! let (client, server) = caps.pair()?;
//!
//! let mut client = sluice::socket::Socket::new(client, watch.clone());
//! let mut server = sluice::socket::Socket::new(server, watch);
//!
//! // A header line announcing the body length, then the body.
//! client.sink(["5\n", "hello"])?;
//!
//! let message = frame::line().flat_map(|header: Bytes| {
//!     let len = std::str::from_utf8(&header)
//!         .ok()
//!         .and_then(|text| text.trim().parse().ok())
//!         .unwrap_or(0);
//!     frame::chunk(len).strict()
//! });
//! assert_eq!(server.decode(message)?, "hello");
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```
//!
//! ## Feature Flags
//!
//! - `driver` (default): a tokio-backed [`Scheduler`](watch::Scheduler) for
//!   asynchronous watches.

pub mod cap;
pub mod clock;
pub mod conduit;
pub mod encoding;
pub mod file;
pub mod frame;
pub mod info;
pub mod pool;
pub mod reader;
pub mod size;
pub mod socket;
pub mod stream;
pub mod wait;
pub mod watch;
