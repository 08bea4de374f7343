//! Payload kinds carried by a [`SyncEnvelope`](crate::SyncEnvelope).
//!
//! An envelope carries exactly one of these.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{ClipboardEntry, FileId, SnippetCollection};

/// All possible envelope payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Payload {
    /// A clipboard item
    Clipboard(ClipboardEntry),
    /// A full snippet collection
    Snippets(SnippetCollection),
    /// Liveness ping
    Ping(Ping),
    /// Greeting sent when a peer is discovered
    Handshake(Handshake),
    /// Announces a file transfer; precedes its chunks
    FileHeader(FileHeader),
    /// One piece of a file transfer
    FileChunk(FileChunk),
}

impl Payload {
    /// Short name of the payload kind, for logs.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Payload::Clipboard(_) => "clipboard",
            Payload::Snippets(_) => "snippets",
            Payload::Ping(_) => "ping",
            Payload::Handshake(_) => "handshake",
            Payload::FileHeader(_) => "file-header",
            Payload::FileChunk(_) => "file-chunk",
        }
    }
}

/// Liveness ping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ping {
    /// Sender's device name
    pub device_name: String,
}

/// Greeting exchanged with a newly discovered peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    /// Sender's device name
    pub device_name: String,
    /// Sender's protocol version
    pub protocol_version: u8,
    /// Port the sender accepts connections on
    pub port: u16,
}

/// File transfer header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileHeader {
    /// Transfer identifier, shared by every chunk
    pub file_id: FileId,
    /// Name of the file on the sender
    pub file_name: String,
    /// Total size in bytes
    pub file_size: u64,
}

/// One chunk of a file transfer.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileChunk {
    /// Transfer this chunk belongs to
    pub file_id: FileId,
    /// Position in the transfer, counting from 0
    pub chunk_index: u64,
    /// Chunk bytes (compressed when `is_compressed`)
    #[serde(with = "crate::b64")]
    pub data: Vec<u8>,
    /// Set on the final chunk
    pub is_last: bool,
    /// Whether `data` is compressed
    #[serde(default)]
    pub is_compressed: bool,
    /// Uncompressed length, present when `is_compressed`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_size: Option<u64>,
}

impl fmt::Debug for FileChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileChunk")
            .field("file_id", &self.file_id)
            .field("chunk_index", &self.chunk_index)
            .field("data", &format!("[{} bytes REDACTED]", self.data.len()))
            .field("is_last", &self.is_last)
            .field("is_compressed", &self.is_compressed)
            .field("original_size", &self.original_size)
            .finish()
    }
}
