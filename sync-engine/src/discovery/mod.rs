//! LAN peer discovery.
//!
//! [`Discovery`] advertises this device and browses for others through a
//! [`DiscoveryBackend`] (mDNS in production, a mock in tests), keeping the
//! [`PeerDirectory`] in step with what is currently advertised.
//!
//! Failure policy:
//! - advertising is retried per [`RestartPolicy`], then escalated as an error
//! - browsing failures are logged; discovery then simply yields no peers

mod mdns;
mod mock;

pub use mdns::{MdnsBackend, SERVICE_TYPE, TXT_NAME_KEY, TXT_VERSION_KEY};
pub use mock::MockDiscoveryBackend;

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use sync_core::{PeerDirectory, RestartPolicy};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

/// Discovery errors.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The discovery daemon could not be started or stopped.
    #[error("discovery daemon error: {0}")]
    Daemon(String),

    /// Publishing the advertisement failed.
    #[error("failed to advertise {name}: {reason}")]
    Advertise {
        /// Device name being advertised.
        name: String,
        /// Backend error.
        reason: String,
    },

    /// Browsing for peers failed.
    #[error("browse failed: {0}")]
    Browse(String),
}

/// Something a backend observed on the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    /// A peer advertisement was (re-)resolved.
    Resolved {
        /// Advertised device name
        name: String,
        /// Endpoints, in no particular order
        addresses: Vec<SocketAddr>,
    },
    /// A peer advertisement went away.
    Lost {
        /// Advertised device name
        name: String,
    },
}

/// What this device advertises.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    /// Local device name
    pub device_name: String,
    /// Port the inbound server listens on
    pub port: u16,
}

/// A service-discovery mechanism.
pub trait DiscoveryBackend: Send + Sync + 'static {
    /// Publish `ad`, replacing nothing; call [`withdraw`](Self::withdraw) first to rename.
    fn advertise(&self, ad: &Advertisement) -> Result<(), DiscoveryError>;

    /// Withdraw the current advertisement, if any.
    fn withdraw(&self) -> Result<(), DiscoveryError>;

    /// Start browsing; events arrive on the returned channel until shutdown.
    fn browse(&self) -> Result<mpsc::Receiver<DiscoveryEvent>, DiscoveryError>;

    /// Stop the backend.
    fn shutdown(&self) -> Result<(), DiscoveryError>;
}

/// Advertises this device and tracks peers.
pub struct Discovery<B: DiscoveryBackend> {
    backend: Arc<B>,
    directory: Arc<PeerDirectory>,
    local_name: watch::Sender<String>,
    port: u16,
    policy: RestartPolicy,
    peers: watch::Sender<Vec<String>>,
    resolved: broadcast::Sender<String>,
    browse_task: Mutex<Option<JoinHandle<()>>>,
}

impl<B: DiscoveryBackend> Discovery<B> {
    /// Create discovery for `device_name` listening on `port`.
    pub fn new(
        backend: B,
        directory: Arc<PeerDirectory>,
        device_name: impl Into<String>,
        port: u16,
        policy: RestartPolicy,
    ) -> Self {
        let (local_name, _) = watch::channel(device_name.into());
        let (peers, _) = watch::channel(Vec::new());
        let (resolved, _) = broadcast::channel(64);
        Self {
            backend: Arc::new(backend),
            directory,
            local_name,
            port,
            policy,
            peers,
            resolved,
            browse_task: Mutex::new(None),
        }
    }

    /// Current local device name.
    pub fn device_name(&self) -> String {
        self.local_name.borrow().clone()
    }

    /// Peer-set notifications: the sorted names of discovered peers,
    /// republished whenever the set changes.
    pub fn subscribe(&self) -> watch::Receiver<Vec<String>> {
        self.peers.subscribe()
    }

    /// Names of peers seen for the first time (or again after being lost).
    pub fn on_resolved(&self) -> broadcast::Receiver<String> {
        self.resolved.subscribe()
    }

    /// Advertise and start browsing.
    ///
    /// Fails only when the advertisement cannot be published after the
    /// restart budget is spent. A browse failure is logged and leaves
    /// discovery running with no peers.
    pub async fn start(&self) -> Result<(), DiscoveryError> {
        let name = self.device_name();
        self.advertise_with_retry(&name).await?;

        match self.backend.browse() {
            Ok(events) => {
                let task = tokio::spawn(run_events(
                    events,
                    Arc::clone(&self.directory),
                    self.local_name.subscribe(),
                    self.peers.clone(),
                    self.resolved.clone(),
                ));
                if let Some(old) = self.lock_task().replace(task) {
                    old.abort();
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "browse failed, no peers will be discovered");
            }
        }
        Ok(())
    }

    /// Re-advertise under a new device name.
    pub async fn restart(&self, new_name: impl Into<String>) -> Result<(), DiscoveryError> {
        let new_name = new_name.into();
        if let Err(e) = self.backend.withdraw() {
            tracing::warn!(error = %e, "failed to withdraw old advertisement");
        }
        self.local_name.send_replace(new_name.clone());
        tracing::info!(name = %new_name, "restarting discovery under new name");
        self.advertise_with_retry(&new_name).await
    }

    /// Withdraw the advertisement and stop browsing.
    pub fn shutdown(&self) -> Result<(), DiscoveryError> {
        if let Some(task) = self.lock_task().take() {
            task.abort();
        }
        if let Err(e) = self.backend.withdraw() {
            tracing::warn!(error = %e, "failed to withdraw advertisement");
        }
        self.backend.shutdown()
    }

    async fn advertise_with_retry(&self, name: &str) -> Result<(), DiscoveryError> {
        let ad = Advertisement {
            device_name: name.to_string(),
            port: self.port,
        };
        let mut attempt = 0;
        loop {
            match self.backend.advertise(&ad) {
                Ok(()) => {
                    tracing::info!(name, port = self.port, "advertising on LAN");
                    return Ok(());
                }
                Err(e) => {
                    attempt += 1;
                    match self.policy.delay_for(attempt) {
                        Some(delay) => {
                            tracing::warn!(error = %e, ?delay, "advertise failed, restarting");
                            tokio::time::sleep(delay).await;
                        }
                        None => {
                            tracing::error!(error = %e, "advertise failed, giving up");
                            return Err(e);
                        }
                    }
                }
            }
        }
    }

    fn lock_task(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.browse_task.lock().unwrap_or_else(|e| e.into_inner())
    }
}

async fn run_events(
    mut events: mpsc::Receiver<DiscoveryEvent>,
    directory: Arc<PeerDirectory>,
    local_name: watch::Receiver<String>,
    peers: watch::Sender<Vec<String>>,
    resolved: broadcast::Sender<String>,
) {
    while let Some(event) = events.recv().await {
        let changed = match event {
            DiscoveryEvent::Resolved { name, addresses } => {
                if *local_name.borrow() == name {
                    continue;
                }
                let is_new = directory.upsert(&name, addresses, Instant::now());
                if is_new {
                    tracing::info!(peer = %name, "peer discovered");
                    let _ = resolved.send(name);
                }
                is_new
            }
            DiscoveryEvent::Lost { name } => {
                let removed = directory.remove(&name);
                if removed {
                    tracing::info!(peer = %name, "peer lost");
                }
                removed
            }
        };
        if changed {
            peers.send_replace(directory.snapshot());
        }
    }
    tracing::debug!("discovery event stream ended");
}
