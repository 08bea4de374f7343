//! lanclip daemon entry point.
//!
//! ## Commands
//!
//! - `run` (default): advertise on the LAN and sync with allow-listed peers
//! - `allow <name>` / `revoke <name>`: edit the allow-list
//! - `rename <name>`: change this device's name
//! - `peers`: print the allow-list
//! - `send <file>`: run until peers are found, send one file, exit
//!
//! `allow`, `revoke` and `rename` edit the configuration file. A running
//! daemon applies the change on SIGHUP (Unix) or at its next start.
//!
//! ## Example
//!
//! ```bash
//! lanclip --config ~/.config/lanclip/lanclip.toml allow "Laptop"
//! lanclip --log-level debug run
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lanclip_sync_daemon::{
    spawn_ping_task, spawn_sweep_task, DaemonConfig, DaemonStores, Node,
};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use sync_core::{PeerDirectory, RestartPolicy};
use sync_engine::{
    Collaborators, Discovery, InboundServer, MdnsBackend, SyncEngine, SyncKey, TcpTransport,
};
use tokio::sync::{broadcast, watch};
use tracing_subscriber::EnvFilter;

/// Clipboard items and file records kept in memory.
const HISTORY_LIMIT: usize = 200;

/// Time allowed for a connected peer to deliver its frame.
const READ_TIMEOUT: Duration = Duration::from_secs(10);

/// How long `send` waits for peers to show up.
const SEND_DISCOVERY_WAIT: Duration = Duration::from_secs(5);

/// LAN clipboard, snippet and file sync.
#[derive(Parser, Debug)]
#[command(name = "lanclip")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file (created with defaults if missing)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log filter, e.g. `info` or `sync_engine=debug` (overrides RUST_LOG)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Advertise on the LAN and sync until interrupted
    Run,

    /// Allow a device to exchange content with this one (SIGHUP a running daemon to apply)
    Allow {
        /// Device name as advertised
        name: String,
    },

    /// Stop exchanging content with a device (SIGHUP a running daemon to apply)
    Revoke {
        /// Device name as advertised
        name: String,
    },

    /// Change this device's name (SIGHUP a running daemon to apply)
    Rename {
        /// New device name
        name: String,
    },

    /// Print the allow-list
    Peers,

    /// Send a file to every reachable allowed device, then exit
    Send {
        /// File to send
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_level.as_deref());

    let config_path = match cli.config {
        Some(path) => path,
        None => default_config_path()?,
    };

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(&config_path).await,
        Commands::Allow { name } => {
            let mut config = DaemonConfig::load_or_create(&config_path)?;
            if config.authorize(&name) {
                config.save(&config_path)?;
                println!("Allowed {name}");
            } else {
                println!("{name} is already allowed");
            }
            Ok(())
        }
        Commands::Revoke { name } => {
            let mut config = DaemonConfig::load_or_create(&config_path)?;
            if config.revoke(&name) {
                config.save(&config_path)?;
                println!("Revoked {name}");
            } else {
                println!("{name} was not allowed");
            }
            Ok(())
        }
        Commands::Rename { name } => {
            let name = name.trim();
            if name.is_empty() {
                anyhow::bail!("device name must not be empty");
            }
            let mut config = DaemonConfig::load_or_create(&config_path)?;
            if config.device.name == name {
                println!("Already named {name}");
            } else {
                config.device.name = name.to_string();
                config.save(&config_path)?;
                println!("Renamed to {name}");
            }
            Ok(())
        }
        Commands::Peers => {
            let config = DaemonConfig::load_or_create(&config_path)?;
            if config.sync.allowed_peers.is_empty() {
                println!("No allowed peers. Add one with `lanclip allow <name>`.");
            }
            for name in &config.sync.allowed_peers {
                println!("{name}");
            }
            Ok(())
        }
        Commands::Send { file } => send(&config_path, &file).await,
    }
}

fn init_logging(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

type LanNode = Node<TcpTransport, MdnsBackend>;

/// A started node plus the tasks serving it.
struct Running {
    node: LanNode,
    shutdown: watch::Sender<bool>,
    tasks: Vec<tokio::task::JoinHandle<()>>,
    server: tokio::task::JoinHandle<()>,
}

async fn start(config: DaemonConfig, config_path: &Path) -> Result<Running> {
    if config.security.passphrase.is_empty() {
        anyhow::bail!("security.passphrase is not set; every device needs the same passphrase and salt");
    }
    let salt = config.salt()?;
    let key = SyncKey::derive(&config.security.passphrase, &salt, config.kdf_params())
        .context("Failed to derive sync key")?;

    let directory = Arc::new(PeerDirectory::with_allow_list(
        config.sync.allowed_peers.iter().cloned(),
    ));
    let stores = Arc::new(DaemonStores::new(HISTORY_LIMIT));
    let engine = Arc::new(SyncEngine::new(
        config.engine_config(),
        key,
        Arc::clone(&directory),
        TcpTransport::new(config.connect_timeout()).with_ack_timeout(config.ack_timeout()),
        Collaborators::from_single(stores),
    ));

    let bind_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.sync.port));
    let server = InboundServer::bind(bind_addr, READ_TIMEOUT, RestartPolicy::default())
        .await
        .context("Failed to bind inbound server")?;
    let (shutdown, shutdown_rx) = watch::channel(false);
    let server = tokio::spawn(server.run(Arc::clone(&engine), shutdown_rx));

    let backend = MdnsBackend::new().context("Failed to start mDNS")?;
    let discovery = Discovery::new(
        backend,
        directory,
        config.device.name.clone(),
        config.sync.port,
        RestartPolicy::default(),
    );
    let resolved = discovery.on_resolved();
    discovery
        .start()
        .await
        .context("Failed to advertise on the LAN")?;

    let tasks = vec![
        spawn_greeter(Arc::clone(&engine), resolved),
        spawn_sweep_task(Arc::clone(&engine), config.sweep_interval()),
        spawn_ping_task(Arc::clone(&engine), config.ping_interval()),
    ];

    tracing::info!(
        device = %config.device.name,
        port = config.sync.port,
        allowed = config.sync.allowed_peers.len(),
        "lanclip running"
    );
    Ok(Running {
        node: Node::new(engine, discovery, config, config_path),
        shutdown,
        tasks,
        server,
    })
}

async fn stop(running: Running) {
    tracing::info!("shutting down");
    running.shutdown.send_replace(true);
    for task in &running.tasks {
        task.abort();
    }
    if let Err(e) = running.node.discovery().shutdown() {
        tracing::warn!(error = %e, "discovery shutdown failed");
    }
    if let Err(e) = running.server.await {
        tracing::debug!(error = %e, "inbound server task ended abnormally");
    }
}

async fn run(config_path: &Path) -> Result<()> {
    let config = DaemonConfig::load_or_create(config_path)?;
    let running = start(config, config_path).await?;

    let result = wait_for_shutdown(&running.node).await;
    stop(running).await;
    result
}

/// Wait for Ctrl-C, reloading the configuration on every SIGHUP.
#[cfg(unix)]
async fn wait_for_shutdown(node: &LanNode) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = signal(SignalKind::hangup()).context("Failed to listen for SIGHUP")?;
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                return result.context("Failed to listen for shutdown signal");
            }
            _ = hangup.recv() => {
                if let Err(e) = node.reload().await {
                    tracing::warn!(error = %e, "configuration reload failed");
                }
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown(_node: &LanNode) -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")
}

async fn send(config_path: &Path, file: &Path) -> Result<()> {
    let config = DaemonConfig::load_or_create(config_path)?;
    let running = start(config, config_path).await?;

    tokio::time::sleep(SEND_DISCOVERY_WAIT).await;
    let result = running.node.engine().send_file(file).await;
    stop(running).await;

    let report = result.context("Failed to send file")?;
    if report.delivered.is_empty() {
        anyhow::bail!("no allowed peer received {}", file.display());
    }
    println!("Sent {} to {}", file.display(), report.delivered.join(", "));
    for peer in &report.failed {
        println!("Could not reach {peer}");
    }
    Ok(())
}

/// Greet each newly discovered peer so it learns about us immediately.
fn spawn_greeter(
    engine: Arc<SyncEngine<TcpTransport>>,
    mut resolved: broadcast::Receiver<String>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match resolved.recv().await {
                Ok(name) => match engine.greet_peer(&name).await {
                    Ok(true) => tracing::debug!(peer = %name, "handshake sent"),
                    Ok(false) => tracing::debug!(peer = %name, "peer not greeted"),
                    Err(e) => tracing::warn!(peer = %name, error = %e, "handshake failed"),
                },
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "missed discovery notifications");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

/// Get the default configuration file path.
fn default_config_path() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("io", "lanclip", "lanclip")
        .context("Could not determine home directory")?;
    Ok(dirs.config_dir().join("lanclip.toml"))
}
