//! Peer directory.
//!
//! Tracks discovered peers, their addresses and liveness, together with the
//! operator-maintained allow-list. Discovery writes while the engine reads,
//! so both halves are concurrent maps and every method takes `&self`.
//!
//! Authorization is a property of the device *name* and is only ever set by
//! local action ([`PeerDirectory::authorize`]); nothing received from the
//! network can change it. A name can be allow-listed before the peer has
//! ever been seen.

use dashmap::{DashMap, DashSet};
use std::net::SocketAddr;
use std::time::Instant;

/// A discovered peer, as seen by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerIdentity {
    /// Human-assigned device name (unique on the LAN)
    pub name: String,
    /// Endpoints to try, in order
    pub addresses: Vec<SocketAddr>,
    /// Last time the peer was resolved or heard from
    pub last_seen: Instant,
    /// Whether the name is on the allow-list
    pub authorized: bool,
}

#[derive(Debug, Clone)]
struct PeerEntry {
    addresses: Vec<SocketAddr>,
    last_seen: Instant,
}

/// Discovered peers plus the allow-list.
#[derive(Debug, Default)]
pub struct PeerDirectory {
    peers: DashMap<String, PeerEntry>,
    allowed: DashSet<String>,
}

impl PeerDirectory {
    /// Create an empty directory with an empty allow-list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a directory with a pre-loaded allow-list.
    pub fn with_allow_list<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let directory = Self::new();
        for name in names {
            directory.allowed.insert(name.into());
        }
        directory
    }

    /// Record a (re-)resolution of `name`.
    ///
    /// Replaces the address list and refreshes `last_seen`. Authorization is
    /// untouched. Returns `true` when the peer was not known before.
    pub fn upsert(&self, name: &str, addresses: Vec<SocketAddr>, now: Instant) -> bool {
        let entry = PeerEntry {
            addresses: order_addresses(addresses),
            last_seen: now,
        };
        self.peers.insert(name.to_string(), entry).is_none()
    }

    /// Forget a peer that is no longer advertised. Returns `true` if it was known.
    pub fn remove(&self, name: &str) -> bool {
        self.peers.remove(name).is_some()
    }

    /// Refresh `last_seen` for a known peer. Returns `false` for unknown names.
    pub fn touch(&self, name: &str, now: Instant) -> bool {
        match self.peers.get_mut(name) {
            Some(mut entry) => {
                entry.last_seen = now;
                true
            }
            None => false,
        }
    }

    /// Whether `name` is on the allow-list.
    pub fn is_authorized(&self, name: &str) -> bool {
        self.allowed.contains(name)
    }

    /// Add `name` to the allow-list. Returns `true` if it was not already there.
    pub fn authorize(&self, name: &str) -> bool {
        self.allowed.insert(name.to_string())
    }

    /// Remove `name` from the allow-list. Returns `true` if it was there.
    pub fn revoke(&self, name: &str) -> bool {
        self.allowed.remove(name).is_some()
    }

    /// The allow-list, sorted.
    pub fn allow_list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.allowed.iter().map(|n| n.key().clone()).collect();
        names.sort();
        names
    }

    /// Names of all discovered peers, sorted.
    pub fn snapshot(&self) -> Vec<String> {
        let mut names: Vec<String> = self.peers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Discovered peers that are on the allow-list, sorted by name.
    pub fn authorized_peers(&self) -> Vec<PeerIdentity> {
        let mut peers: Vec<PeerIdentity> = self
            .peers
            .iter()
            .filter(|e| self.allowed.contains(e.key()))
            .map(|e| self.identity(e.key(), e.value()))
            .collect();
        peers.sort_by(|a, b| a.name.cmp(&b.name));
        peers
    }

    /// Look up one peer.
    pub fn get(&self, name: &str) -> Option<PeerIdentity> {
        self.peers.get(name).map(|e| self.identity(e.key(), e.value()))
    }

    /// Number of discovered peers.
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Whether no peers are discovered.
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    fn identity(&self, name: &str, entry: &PeerEntry) -> PeerIdentity {
        PeerIdentity {
            name: name.to_string(),
            addresses: entry.addresses.clone(),
            last_seen: entry.last_seen,
            authorized: self.allowed.contains(name),
        }
    }
}

/// Order addresses for connection attempts: IPv4 first, then IPv6, each
/// ascending, duplicates removed.
pub fn order_addresses(mut addresses: Vec<SocketAddr>) -> Vec<SocketAddr> {
    addresses.sort_by(|a, b| a.is_ipv6().cmp(&b.is_ipv6()).then_with(|| a.cmp(b)));
    addresses.dedup();
    addresses
}
