//! Receiver-side file transfer state machine.
//!
//! ```text
//! NoSuchTransfer --header--> Receiving --chunk--> Receiving --last chunk--> Completed
//! ```
//!
//! The table only does bookkeeping. The caller owns the actual file through
//! the per-transfer `sink` value and performs the writes; the table checks
//! that each chunk belongs to a live transfer, comes from the sender that
//! opened it, and arrives in sequence.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use sync_types::FileId;
use thiserror::Error;

/// Protocol violations detected by the transfer table.
///
/// None of these are fatal: the offending header or chunk is dropped.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransferError {
    /// A header reused the id of a transfer that is still open
    #[error("transfer {0} is already in progress")]
    AlreadyInProgress(FileId),

    /// A chunk referenced no open transfer (never opened, completed or abandoned)
    #[error("no transfer in progress for {0}")]
    UnknownTransfer(FileId),

    /// A chunk came from a different device than the header
    #[error("chunk for {file_id} from {actual}, transfer was opened by {expected}")]
    WrongSender {
        /// Transfer id
        file_id: FileId,
        /// Device that sent the header
        expected: String,
        /// Device that sent the chunk
        actual: String,
    },

    /// A chunk arrived out of sequence
    #[error("chunk {actual} for {file_id} is out of sequence, expected {expected}")]
    OutOfSequence {
        /// Transfer id
        file_id: FileId,
        /// Next index the table expects
        expected: u64,
        /// Index that arrived
        actual: u64,
    },

    /// A chunk would grow the file past the size announced in the header
    #[error("chunk for {file_id} exceeds announced size {total_size} (would reach {would_reach})")]
    ExceedsAnnouncedSize {
        /// Transfer id
        file_id: FileId,
        /// Size from the header
        total_size: u64,
        /// Size after this chunk
        would_reach: u64,
    },
}

/// A file transfer in progress.
#[derive(Debug)]
pub struct PendingFileTransfer<S> {
    /// Transfer id
    pub file_id: FileId,
    /// File name from the header (already sanitized by the caller)
    pub file_name: String,
    /// Size announced in the header
    pub total_size: u64,
    /// Device that opened the transfer
    pub sender: String,
    /// Where the file is being written
    pub destination: PathBuf,
    /// Bytes accepted so far
    pub bytes_written: u64,
    /// Index of the next expected chunk
    pub next_index: u64,
    /// Last time a header or chunk touched this transfer
    pub last_activity: Instant,
    /// Caller-owned write handle
    pub sink: S,
}

/// Outcome of an accepted chunk.
#[derive(Debug)]
pub enum ChunkDisposition<'a, S> {
    /// More chunks are expected; the transfer stays in the table
    Receiving(&'a mut PendingFileTransfer<S>),
    /// This was the last chunk; the transfer has left the table
    Completed(PendingFileTransfer<S>),
}

/// Open transfers keyed by id.
#[derive(Debug)]
pub struct TransferTable<S> {
    pending: HashMap<FileId, PendingFileTransfer<S>>,
}

impl<S> TransferTable<S> {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            pending: HashMap::new(),
        }
    }

    /// Open a transfer for a received header.
    #[allow(clippy::too_many_arguments)]
    pub fn begin(
        &mut self,
        file_id: FileId,
        file_name: String,
        total_size: u64,
        sender: String,
        destination: PathBuf,
        sink: S,
        now: Instant,
    ) -> Result<(), TransferError> {
        if self.pending.contains_key(&file_id) {
            return Err(TransferError::AlreadyInProgress(file_id));
        }
        self.pending.insert(
            file_id,
            PendingFileTransfer {
                file_id,
                file_name,
                total_size,
                sender,
                destination,
                bytes_written: 0,
                next_index: 0,
                last_activity: now,
                sink,
            },
        );
        Ok(())
    }

    /// Account for a chunk of `len` decoded bytes.
    ///
    /// On success the chunk is counted and the caller must write it through
    /// the returned transfer's sink. A rejected chunk leaves the table
    /// unchanged.
    pub fn accept_chunk(
        &mut self,
        file_id: FileId,
        sender: &str,
        chunk_index: u64,
        len: u64,
        is_last: bool,
        now: Instant,
    ) -> Result<ChunkDisposition<'_, S>, TransferError> {
        let transfer = self
            .pending
            .get_mut(&file_id)
            .ok_or(TransferError::UnknownTransfer(file_id))?;

        if transfer.sender != sender {
            return Err(TransferError::WrongSender {
                file_id,
                expected: transfer.sender.clone(),
                actual: sender.to_string(),
            });
        }
        if chunk_index != transfer.next_index {
            return Err(TransferError::OutOfSequence {
                file_id,
                expected: transfer.next_index,
                actual: chunk_index,
            });
        }
        let would_reach = transfer.bytes_written.saturating_add(len);
        if would_reach > transfer.total_size {
            return Err(TransferError::ExceedsAnnouncedSize {
                file_id,
                total_size: transfer.total_size,
                would_reach,
            });
        }

        transfer.bytes_written = would_reach;
        transfer.next_index += 1;
        transfer.last_activity = now;

        if is_last {
            match self.pending.remove(&file_id) {
                Some(done) => Ok(ChunkDisposition::Completed(done)),
                None => Err(TransferError::UnknownTransfer(file_id)),
            }
        } else {
            match self.pending.get_mut(&file_id) {
                Some(transfer) => Ok(ChunkDisposition::Receiving(transfer)),
                None => Err(TransferError::UnknownTransfer(file_id)),
            }
        }
    }

    /// Remove a transfer without completing it.
    pub fn abandon(&mut self, file_id: &FileId) -> Option<PendingFileTransfer<S>> {
        self.pending.remove(file_id)
    }

    /// Remove every transfer idle for at least `max_idle` at `now`.
    pub fn sweep_stale(&mut self, now: Instant, max_idle: Duration) -> Vec<PendingFileTransfer<S>> {
        let stale: Vec<FileId> = self
            .pending
            .values()
            .filter(|t| now.saturating_duration_since(t.last_activity) >= max_idle)
            .map(|t| t.file_id)
            .collect();
        stale
            .iter()
            .filter_map(|id| self.pending.remove(id))
            .collect()
    }

    /// Whether a transfer is open.
    pub fn contains(&self, file_id: &FileId) -> bool {
        self.pending.contains_key(file_id)
    }

    /// Number of open transfers.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether no transfers are open.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl<S> Default for TransferTable<S> {
    fn default() -> Self {
        Self::new()
    }
}
