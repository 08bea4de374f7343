//! A running node: engine, discovery and the configuration they came from.
//!
//! Settings that can change while the daemon runs go through [`Node`] so the
//! engine, discovery and the configuration file never disagree:
//!
//! - [`Node::rename`]: new origin name on envelopes, new advertisement, saved
//! - [`Node::reload`]: re-read the file and apply the allow-list, name and
//!   enabled flag

use std::path::{Path, PathBuf};
use std::sync::Arc;
use sync_engine::{Discovery, DiscoveryBackend, DiscoveryError, SyncEngine, Transport};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::config::{ConfigError, DaemonConfig};

/// Errors from changing a running node.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Reading or writing the configuration failed.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Re-advertising under the new name failed.
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    /// Device names must contain something besides whitespace.
    #[error("device name must not be empty")]
    EmptyName,
}

/// What a [`Node::reload`] changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReloadReport {
    /// Devices added to the allow-list
    pub allowed: Vec<String>,
    /// Devices removed from the allow-list
    pub revoked: Vec<String>,
    /// New device name, if it changed
    pub renamed: Option<String>,
    /// New enabled flag, if it changed
    pub enabled: Option<bool>,
}

impl ReloadReport {
    /// Whether nothing changed.
    pub fn is_empty(&self) -> bool {
        self.allowed.is_empty()
            && self.revoked.is_empty()
            && self.renamed.is_none()
            && self.enabled.is_none()
    }
}

/// Engine plus discovery, kept in step with the configuration file.
pub struct Node<T: Transport, B: DiscoveryBackend> {
    engine: Arc<SyncEngine<T>>,
    discovery: Discovery<B>,
    config: Mutex<DaemonConfig>,
    config_path: PathBuf,
}

impl<T: Transport, B: DiscoveryBackend> Node<T, B> {
    /// Wrap a started engine and discovery.
    pub fn new(
        engine: Arc<SyncEngine<T>>,
        discovery: Discovery<B>,
        config: DaemonConfig,
        config_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            engine,
            discovery,
            config: Mutex::new(config),
            config_path: config_path.into(),
        }
    }

    /// The engine.
    pub fn engine(&self) -> &Arc<SyncEngine<T>> {
        &self.engine
    }

    /// Discovery.
    pub fn discovery(&self) -> &Discovery<B> {
        &self.discovery
    }

    /// Configuration file backing this node.
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Rename this device.
    ///
    /// The configuration is saved first, then the engine's origin name and
    /// the advertisement follow. Returns `false` if the name is unchanged.
    pub async fn rename(&self, name: &str) -> Result<bool, NodeError> {
        let name = valid_name(name)?;
        let mut config = self.config.lock().await;
        if config.device.name == name {
            return Ok(false);
        }
        config.device.name = name.clone();
        config.save(&self.config_path)?;
        drop(config);

        self.apply_name(name).await?;
        Ok(true)
    }

    /// Re-read the configuration file and apply what can change at runtime.
    ///
    /// Port, key material and transfer settings need a restart.
    pub async fn reload(&self) -> Result<ReloadReport, NodeError> {
        let fresh = DaemonConfig::from_file(&self.config_path)?;
        let mut config = self.config.lock().await;
        let mut report = ReloadReport::default();

        let directory = self.engine.directory();
        let current = directory.allow_list();
        for name in &fresh.sync.allowed_peers {
            if directory.authorize(name) {
                report.allowed.push(name.clone());
            }
        }
        for name in current {
            if !fresh.sync.allowed_peers.contains(&name) && directory.revoke(&name) {
                report.revoked.push(name);
            }
        }

        if fresh.sync.enabled != self.engine.is_enabled() {
            self.engine.set_enabled(fresh.sync.enabled);
            report.enabled = Some(fresh.sync.enabled);
        }

        let rename = (fresh.device.name != config.device.name)
            .then(|| valid_name(&fresh.device.name))
            .transpose()?;

        config.sync.allowed_peers = fresh.sync.allowed_peers;
        config.sync.enabled = fresh.sync.enabled;
        if let Some(name) = &rename {
            config.device.name = name.clone();
        }
        drop(config);

        if let Some(name) = rename {
            self.apply_name(name.clone()).await?;
            report.renamed = Some(name);
        }

        if !report.is_empty() {
            tracing::info!(
                allowed = ?report.allowed,
                revoked = ?report.revoked,
                renamed = ?report.renamed,
                enabled = ?report.enabled,
                "configuration reloaded"
            );
        }
        Ok(report)
    }

    async fn apply_name(&self, name: String) -> Result<(), DiscoveryError> {
        self.engine.set_device_name(name.clone());
        self.discovery.restart(name).await
    }
}

fn valid_name(name: &str) -> Result<String, NodeError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(NodeError::EmptyName);
    }
    Ok(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::DaemonStores;
    use std::time::Instant;
    use sync_core::{PeerDirectory, RestartPolicy};
    use sync_engine::{
        Collaborators, MockDiscoveryBackend, MockTransport, SyncKey, SyncSecret,
    };
    use sync_types::{ClipboardEntry, ClipboardPayload, SyncEnvelope};
    use tempfile::TempDir;

    fn key() -> SyncKey {
        SyncKey::from_secret(&SyncSecret::from_bytes([5; 32])).unwrap()
    }

    struct Fixture {
        node: Node<MockTransport, MockDiscoveryBackend>,
        transport: MockTransport,
        backend: MockDiscoveryBackend,
        dir: TempDir,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lanclip.toml");
        let mut config = DaemonConfig::load_or_create(&path).unwrap();
        config.device.name = "Desk".into();
        config.authorize("Laptop");
        config.transfer.download_dir = dir.path().join("downloads");
        config.save(&path).unwrap();

        let directory = Arc::new(PeerDirectory::with_allow_list(
            config.sync.allowed_peers.iter().cloned(),
        ));
        directory.upsert(
            "Laptop",
            vec!["127.0.0.1:5566".parse().unwrap()],
            Instant::now(),
        );
        let transport = MockTransport::new();
        let engine = Arc::new(SyncEngine::new(
            config.engine_config(),
            key(),
            Arc::clone(&directory),
            transport.clone(),
            Collaborators::from_single(Arc::new(DaemonStores::new(10))),
        ));
        let backend = MockDiscoveryBackend::new();
        let discovery = Discovery::new(
            backend.clone(),
            directory,
            config.device.name.clone(),
            config.sync.port,
            RestartPolicy::immediate(1),
        );
        discovery.start().await.unwrap();

        Fixture {
            node: Node::new(engine, discovery, config, path),
            transport,
            backend,
            dir,
        }
    }

    fn origins(transport: &MockTransport, peer: &str) -> Vec<String> {
        transport
            .frames_to(peer)
            .iter()
            .map(|frame| {
                SyncEnvelope::from_json(&key().decrypt(frame).unwrap())
                    .unwrap()
                    .origin
            })
            .collect()
    }

    fn text(s: &str) -> ClipboardEntry {
        ClipboardEntry::new(ClipboardPayload::Text(s.into()), None)
    }

    // =========================================================================
    // Rename
    // =========================================================================

    #[tokio::test]
    async fn rename_moves_advertisement_and_envelope_origin_together() {
        let f = fixture().await;
        f.node.engine().broadcast_clipboard_item(text("before")).await.unwrap();

        assert!(f.node.rename("Studio").await.unwrap());
        f.node.engine().broadcast_clipboard_item(text("after")).await.unwrap();

        assert_eq!(f.backend.advertised().last().unwrap().device_name, "Studio");
        assert_eq!(f.backend.withdraw_count(), 1);
        assert_eq!(f.node.discovery().device_name(), "Studio");
        assert_eq!(f.node.engine().device_name(), "Studio");
        assert_eq!(origins(&f.transport, "Laptop"), vec!["Desk", "Studio"]);

        let saved = DaemonConfig::from_file(f.node.config_path()).unwrap();
        assert_eq!(saved.device.name, "Studio");
    }

    #[tokio::test]
    async fn rename_to_same_name_is_a_no_op() {
        let f = fixture().await;
        assert!(!f.node.rename(" Desk ").await.unwrap());
        assert_eq!(f.backend.withdraw_count(), 0);
        assert_eq!(f.backend.advertised().len(), 1);
    }

    #[tokio::test]
    async fn empty_name_is_rejected() {
        let f = fixture().await;
        assert!(matches!(f.node.rename("   ").await, Err(NodeError::EmptyName)));
        assert_eq!(f.node.engine().device_name(), "Desk");
    }

    // =========================================================================
    // Reload
    // =========================================================================

    #[tokio::test]
    async fn reload_applies_allow_list_changes() {
        let f = fixture().await;
        let mut edited = DaemonConfig::from_file(f.node.config_path()).unwrap();
        edited.revoke("Laptop");
        edited.authorize("Phone");
        edited.save(f.node.config_path()).unwrap();

        let report = f.node.reload().await.unwrap();
        assert_eq!(report.allowed, vec!["Phone"]);
        assert_eq!(report.revoked, vec!["Laptop"]);

        let directory = f.node.engine().directory();
        assert!(directory.is_authorized("Phone"));
        assert!(!directory.is_authorized("Laptop"));

        // A revoked peer no longer receives anything.
        let sent = f.node.engine().broadcast_clipboard_item(text("x")).await.unwrap();
        assert!(sent.delivered.is_empty());
        assert!(f.transport.frames_to("Laptop").is_empty());
    }

    #[tokio::test]
    async fn reload_picks_up_rename_and_enabled_flag() {
        let f = fixture().await;
        let mut edited = DaemonConfig::from_file(f.node.config_path()).unwrap();
        edited.device.name = "Studio".into();
        edited.sync.enabled = false;
        edited.save(f.node.config_path()).unwrap();

        let report = f.node.reload().await.unwrap();
        assert_eq!(report.renamed.as_deref(), Some("Studio"));
        assert_eq!(report.enabled, Some(false));
        assert_eq!(f.node.engine().device_name(), "Studio");
        assert_eq!(f.backend.advertised().last().unwrap().device_name, "Studio");
        assert!(!f.node.engine().is_enabled());
    }

    #[tokio::test]
    async fn unchanged_file_reloads_to_empty_report() {
        let f = fixture().await;
        let report = f.node.reload().await.unwrap();
        assert!(report.is_empty());
        assert!(f.dir.path().join("lanclip.toml").exists());
    }
}
