//! # sync-daemon
//!
//! Process wiring for lanclip: configuration, collaborator stores, the
//! running [`Node`] and the background tasks the `lanclip` binary runs next
//! to the engine.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod node;
pub mod stores;
pub mod tasks;

pub use config::{ConfigError, DaemonConfig};
pub use node::{Node, NodeError, ReloadReport};
pub use stores::{DaemonStores, FileRecord};
pub use tasks::{spawn_ping_task, spawn_sweep_task};
