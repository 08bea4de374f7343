//! Collaborator interfaces the engine calls out to.
//!
//! Implementations live outside the engine (clipboard history, snippet
//! editor, file history UI) and are assumed to do their own
//! synchronization.

use std::path::Path;
use std::sync::Arc;
use sync_types::{ClipboardEntry, SnippetCollection};

/// Receives clipboard items accepted from peers.
pub trait ClipboardStore: Send + Sync {
    /// Apply an item received from the network.
    fn apply_remote_item(&self, entry: ClipboardEntry);
}

/// Receives snippet collections accepted from peers.
pub trait SnippetStore: Send + Sync {
    /// Replace the local collection with one received from the network.
    fn apply_remote_collection(&self, collection: SnippetCollection);
}

/// Records file transfers.
pub trait FileHistoryStore: Send + Sync {
    /// A file was received completely.
    fn record_received_file(&self, name: &str, path: &Path, size: u64, sender: &str);

    /// A file was sent; `peers` are the devices that received every chunk.
    fn record_sent_file(&self, name: &str, path: &Path, size: u64, peers: &[String]);

    /// An incoming transfer was abandoned and its partial file removed.
    fn record_failed_file(&self, name: &str, sender: &str, reason: &str);
}

/// The set of collaborators handed to the engine.
#[derive(Clone)]
pub struct Collaborators {
    /// Clipboard history
    pub clipboard: Arc<dyn ClipboardStore>,
    /// Snippet store
    pub snippets: Arc<dyn SnippetStore>,
    /// File history
    pub files: Arc<dyn FileHistoryStore>,
}

impl Collaborators {
    /// Use one value for every collaborator role.
    pub fn from_single<S>(store: Arc<S>) -> Self
    where
        S: ClipboardStore + SnippetStore + FileHistoryStore + 'static,
    {
        Self {
            clipboard: store.clone(),
            snippets: store.clone(),
            files: store,
        }
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}
