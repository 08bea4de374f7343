//! Headless collaborators: keep a bounded in-memory history and log it.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use sync_engine::{ClipboardStore, FileHistoryStore, SnippetStore};
use sync_types::{ClipboardEntry, SnippetCollection};

/// A file transfer as remembered by the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileRecord {
    /// Received completely.
    Received {
        /// File name
        name: String,
        /// Where it was written
        path: PathBuf,
        /// Bytes received
        size: u64,
        /// Sending device
        sender: String,
    },
    /// Sent to `peers`.
    Sent {
        /// File name
        name: String,
        /// Bytes sent
        size: u64,
        /// Devices that received every chunk
        peers: Vec<String>,
    },
    /// Abandoned.
    Failed {
        /// File name
        name: String,
        /// Sending device
        sender: String,
        /// What went wrong
        reason: String,
    },
}

/// In-memory clipboard, snippet and file history.
#[derive(Debug)]
pub struct DaemonStores {
    limit: usize,
    clipboard: Mutex<VecDeque<ClipboardEntry>>,
    snippets: Mutex<Option<SnippetCollection>>,
    files: Mutex<VecDeque<FileRecord>>,
}

impl DaemonStores {
    /// Keep at most `limit` clipboard items and file records.
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            clipboard: Mutex::new(VecDeque::new()),
            snippets: Mutex::new(None),
            files: Mutex::new(VecDeque::new()),
        }
    }

    /// Clipboard items, newest first.
    pub fn clipboard_history(&self) -> Vec<ClipboardEntry> {
        lock(&self.clipboard).iter().cloned().collect()
    }

    /// The most recently received snippet collection.
    pub fn snippets(&self) -> Option<SnippetCollection> {
        lock(&self.snippets).clone()
    }

    /// File records, newest first.
    pub fn file_history(&self) -> Vec<FileRecord> {
        lock(&self.files).iter().cloned().collect()
    }

    fn push_file(&self, record: FileRecord) {
        let mut files = lock(&self.files);
        files.push_front(record);
        files.truncate(self.limit);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl ClipboardStore for DaemonStores {
    fn apply_remote_item(&self, entry: ClipboardEntry) {
        tracing::info!(
            kind = ?entry.payload().kind(),
            len = entry.payload().len(),
            source = entry.source_label().unwrap_or("-"),
            "clipboard item received"
        );
        let mut history = lock(&self.clipboard);
        if let Some(hash) = entry.content_hash() {
            history.retain(|existing| existing.content_hash() != Some(hash));
        }
        history.push_front(entry);
        history.truncate(self.limit);
    }
}

impl SnippetStore for DaemonStores {
    fn apply_remote_collection(&self, collection: SnippetCollection) {
        tracing::info!(
            folders = collection.folders.len(),
            snippets = collection.snippet_count(),
            "snippet collection received"
        );
        *lock(&self.snippets) = Some(collection);
    }
}

impl FileHistoryStore for DaemonStores {
    fn record_received_file(&self, name: &str, path: &Path, size: u64, sender: &str) {
        tracing::info!(file = name, path = %path.display(), size, sender, "file saved");
        self.push_file(FileRecord::Received {
            name: name.to_string(),
            path: path.to_path_buf(),
            size,
            sender: sender.to_string(),
        });
    }

    fn record_sent_file(&self, name: &str, _path: &Path, size: u64, peers: &[String]) {
        tracing::info!(file = name, size, peers = ?peers, "file sent");
        self.push_file(FileRecord::Sent {
            name: name.to_string(),
            size,
            peers: peers.to_vec(),
        });
    }

    fn record_failed_file(&self, name: &str, sender: &str, reason: &str) {
        tracing::warn!(file = name, sender, reason, "file transfer failed");
        self.push_file(FileRecord::Failed {
            name: name.to_string(),
            sender: sender.to_string(),
            reason: reason.to_string(),
        });
    }
}
