//! Recently seen content hashes.
//!
//! Used both to stop re-broadcast loops and to avoid applying an inbound
//! item twice when it arrives over more than one path.

use std::collections::HashMap;
use std::time::{Duration, Instant};
use sync_types::ContentHash;

/// Retention window for seen hashes.
pub const DEDUP_WINDOW: Duration = Duration::from_secs(5 * 60);

/// Mapping from content hash to the time it was last observed.
///
/// Entries older than the window are pruned before every lookup.
#[derive(Debug, Clone)]
pub struct RecentHashSet {
    window: Duration,
    seen: HashMap<ContentHash, Instant>,
}

impl RecentHashSet {
    /// Create an empty set with the given retention window.
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            seen: HashMap::new(),
        }
    }

    /// The retention window.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Whether `hash` was observed within the window ending at `now`.
    pub fn contains(&mut self, hash: &ContentHash, now: Instant) -> bool {
        self.prune(now);
        self.seen.contains_key(hash)
    }

    /// Record `hash` as observed at `now`.
    ///
    /// Returns `true` if the hash was not already present within the window.
    pub fn insert(&mut self, hash: ContentHash, now: Instant) -> bool {
        self.prune(now);
        self.seen.insert(hash, now).is_none()
    }

    /// Drop every entry older than the window.
    pub fn prune(&mut self, now: Instant) {
        let window = self.window;
        self.seen
            .retain(|_, seen_at| now.saturating_duration_since(*seen_at) < window);
    }

    /// Number of entries, including ones not yet pruned.
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

impl Default for RecentHashSet {
    fn default() -> Self {
        Self::new(DEDUP_WINDOW)
    }
}
