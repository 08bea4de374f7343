//! # sync-types
//!
//! Data model and wire format types for lanclip LAN clipboard sync.
//!
//! This crate provides the foundational types used across all lanclip crates:
//! - [`ClipboardEntry`], [`SnippetCollection`] - The content that gets synced
//! - [`ContentHash`], [`FileId`] - Identity types
//! - [`SyncEnvelope`] - The single-payload wire message
//! - [`Payload`] - Payload kinds (clipboard, snippets, ping, handshake, file header/chunk)
//! - Content addressing ([`hash_text`], [`hash_payload`], [`hash_collection`])
//! - [`SyncError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod b64;
mod digest;
mod entry;
mod envelope;
mod error;
mod ids;
mod messages;
mod snippets;

pub use digest::{hash_bytes, hash_collection, hash_path, hash_payload, hash_text, normalize_text};
pub use entry::{ClipboardEntry, ClipboardPayload, PayloadKind};
pub use envelope::{SyncEnvelope, PROTOCOL_VERSION};
pub use error::SyncError;
pub use ids::{ContentHash, FileId};
pub use messages::{FileChunk, FileHeader, Handshake, Payload, Ping};
pub use snippets::{Snippet, SnippetCollection, SnippetFolder};
