//! # sync-core
//!
//! Pure logic for lanclip (no I/O, instant tests).
//!
//! This crate implements the bookkeeping and algorithms of the sync engine
//! without any network or disk I/O, enabling fast unit tests.
//!
//! ## Design Philosophy
//!
//! Time is always passed in as an [`std::time::Instant`] rather than read
//! from the clock, so window expiry and staleness are deterministic in
//! tests. The actual I/O (sockets, files) is performed by `sync-engine`,
//! which drives these structures.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod chunking;
pub mod dedup;
pub mod peers;
pub mod restart;
pub mod transfer;

pub use chunking::{chunk_count, chunk_size_for, is_plausibly_text, Throttle, SNIFF_LEN};
pub use dedup::{RecentHashSet, DEDUP_WINDOW};
pub use peers::{order_addresses, PeerDirectory, PeerIdentity};
pub use restart::RestartPolicy;
pub use transfer::{ChunkDisposition, PendingFileTransfer, TransferError, TransferTable};
