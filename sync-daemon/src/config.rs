//! Configuration loading for the lanclip daemon.
//!
//! Configuration is loaded from a TOML file (default: `lanclip.toml` in the
//! platform config directory). A missing file is created with defaults and a
//! fresh random salt.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use sync_core::Throttle;
use sync_engine::{EngineConfig, KdfParams};

/// Salt length generated for new configurations.
pub const SALT_LEN: usize = 16;

/// Root configuration for the daemon.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Device identity.
    #[serde(default)]
    pub device: DeviceConfig,
    /// Sync behavior and peers.
    #[serde(default)]
    pub sync: SyncConfig,
    /// Key material.
    #[serde(default)]
    pub security: SecurityConfig,
    /// File transfer settings.
    #[serde(default)]
    pub transfer: TransferConfig,
}

/// Device identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Name advertised on the LAN and used as envelope origin.
    #[serde(default = "default_device_name")]
    pub name: String,
}

/// Sync behavior and peers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Whether sync starts enabled (default: true).
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// TCP port for inbound frames (default: 5566).
    #[serde(default = "default_port")]
    pub port: u16,
    /// Device names allowed to exchange content with this device.
    #[serde(default)]
    pub allowed_peers: Vec<String>,
    /// Liveness ping interval in seconds (default: 60).
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,
}

/// Key material. Every device in a group needs the same values.
#[derive(Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Shared passphrase.
    #[serde(default)]
    pub passphrase: String,
    /// Hex-encoded Argon2id salt.
    #[serde(default)]
    pub salt: String,
    /// Argon2id memory cost in KiB (default: 19456).
    #[serde(default = "default_kdf_memory_kib")]
    pub kdf_memory_kib: u32,
    /// Argon2id iterations (default: 2).
    #[serde(default = "default_kdf_iterations")]
    pub kdf_iterations: u32,
}

impl std::fmt::Debug for SecurityConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityConfig")
            .field("passphrase", &"[REDACTED]")
            .field("salt", &self.salt)
            .field("kdf_memory_kib", &self.kdf_memory_kib)
            .field("kdf_iterations", &self.kdf_iterations)
            .finish()
    }
}

/// File transfer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Where received files are written.
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
    /// Idle seconds before an incoming transfer is abandoned (default: 300).
    #[serde(default = "default_stale_after")]
    pub stale_after_secs: u64,
    /// Seconds between stale-transfer sweeps (default: 60).
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    /// Per-address connect timeout in milliseconds (default: 3000).
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    /// Wait for a peer to acknowledge a frame, in milliseconds (default: 30000).
    #[serde(default = "default_ack_timeout")]
    pub ack_timeout_ms: u64,
}

// Default value functions
fn default_device_name() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .ok()
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| "lanclip".to_string())
}

fn default_enabled() -> bool {
    true
}

fn default_port() -> u16 {
    5566
}

fn default_ping_interval() -> u64 {
    60
}

fn default_kdf_memory_kib() -> u32 {
    KdfParams::default().memory_kib()
}

fn default_kdf_iterations() -> u32 {
    KdfParams::default().iterations()
}

fn default_download_dir() -> PathBuf {
    directories::UserDirs::new()
        .and_then(|dirs| dirs.download_dir().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("downloads"))
}

fn default_stale_after() -> u64 {
    300 // 5 minutes
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_connect_timeout() -> u64 {
    3000
}

fn default_ack_timeout() -> u64 {
    30_000
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: default_device_name(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            port: default_port(),
            allowed_peers: Vec::new(),
            ping_interval_secs: default_ping_interval(),
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            passphrase: String::new(),
            salt: String::new(),
            kdf_memory_kib: default_kdf_memory_kib(),
            kdf_iterations: default_kdf_iterations(),
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            stale_after_secs: default_stale_after(),
            sweep_interval_secs: default_sweep_interval(),
            connect_timeout_ms: default_connect_timeout(),
            ack_timeout_ms: default_ack_timeout(),
        }
    }
}

impl DaemonConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Load the file at `path`, creating it with defaults if it is missing.
    ///
    /// A configuration without a salt gets a fresh random one, and the
    /// file is rewritten.
    pub fn load_or_create(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            Self::from_file(path)?
        } else {
            tracing::info!(path = %path.display(), "creating default configuration");
            Self::default()
        };

        if config.security.salt.is_empty() {
            config.security.salt = generate_salt()?;
            config.save(path)?;
        }
        Ok(config)
    }

    /// Write the configuration to `path`, owner-readable only.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let write_err = |source| ConfigError::WriteError {
            path: path.to_path_buf(),
            source,
        };
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        std::fs::write(path, content).map_err(write_err)?;
        set_file_permissions_0600(path).map_err(write_err)?;
        Ok(())
    }

    /// Add `name` to the allow-list. Returns `false` if it was already there.
    pub fn authorize(&mut self, name: &str) -> bool {
        if self.sync.allowed_peers.iter().any(|p| p == name) {
            return false;
        }
        self.sync.allowed_peers.push(name.to_string());
        self.sync.allowed_peers.sort();
        true
    }

    /// Remove `name` from the allow-list. Returns `false` if it was not there.
    pub fn revoke(&mut self, name: &str) -> bool {
        let before = self.sync.allowed_peers.len();
        self.sync.allowed_peers.retain(|p| p != name);
        self.sync.allowed_peers.len() != before
    }

    /// Decoded salt.
    pub fn salt(&self) -> Result<Vec<u8>, ConfigError> {
        hex::decode(&self.security.salt).map_err(|e| ConfigError::InvalidSalt(e.to_string()))
    }

    /// Argon2id parameters.
    pub fn kdf_params(&self) -> KdfParams {
        KdfParams::new(self.security.kdf_memory_kib, self.security.kdf_iterations)
    }

    /// Engine settings derived from this configuration.
    pub fn engine_config(&self) -> EngineConfig {
        let mut engine = EngineConfig::new(&self.device.name, &self.transfer.download_dir);
        engine.port = self.sync.port;
        engine.enabled = self.sync.enabled;
        engine.stale_after = Duration::from_secs(self.transfer.stale_after_secs);
        engine.throttle = Throttle::default();
        engine
    }

    /// Per-address connect timeout.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.transfer.connect_timeout_ms)
    }

    /// Acknowledgement timeout.
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.transfer.ack_timeout_ms)
    }

    /// Interval between stale-transfer sweeps.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.transfer.sweep_interval_secs.max(1))
    }

    /// Interval between liveness pings.
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.sync.ping_interval_secs.max(1))
    }
}

fn generate_salt() -> Result<String, ConfigError> {
    let mut salt = [0u8; SALT_LEN];
    getrandom::getrandom(&mut salt).map_err(|e| ConfigError::Random(e.to_string()))?;
    Ok(hex::encode(salt))
}

/// Set file permissions to 0600 (owner read/write only) on Unix.
/// No-op on non-Unix platforms.
fn set_file_permissions_0600(path: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
    Ok(())
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// Failed to write configuration file.
    #[error("failed to write config file {path}: {source}")]
    WriteError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to serialize the configuration.
    #[error("failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),
    /// Salt is not valid hex.
    #[error("invalid salt: {0}")]
    InvalidSalt(String),
    /// The OS random source failed.
    #[error("random number generation failed: {0}")]
    Random(String),
}
