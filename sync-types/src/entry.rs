//! Clipboard entries - the unit of clipboard replication.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::{digest, ContentHash};

/// The content captured from a clipboard.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "camelCase")]
pub enum ClipboardPayload {
    /// Plain text
    Text(String),
    /// Image bytes (PNG/TIFF as captured)
    Image(#[serde(with = "crate::b64")] Vec<u8>),
    /// RTF document bytes
    RichText(#[serde(with = "crate::b64")] Vec<u8>),
    /// PDF document bytes
    Pdf(#[serde(with = "crate::b64")] Vec<u8>),
    /// Reference to a file on the capturing device
    FileRef(PathBuf),
}

/// Payload discriminator, used for logging without touching content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    /// Plain text
    Text,
    /// Image bytes
    Image,
    /// RTF bytes
    RichText,
    /// PDF bytes
    Pdf,
    /// File reference
    FileRef,
}

impl ClipboardPayload {
    /// The kind of this payload.
    pub fn kind(&self) -> PayloadKind {
        match self {
            ClipboardPayload::Text(_) => PayloadKind::Text,
            ClipboardPayload::Image(_) => PayloadKind::Image,
            ClipboardPayload::RichText(_) => PayloadKind::RichText,
            ClipboardPayload::Pdf(_) => PayloadKind::Pdf,
            ClipboardPayload::FileRef(_) => PayloadKind::FileRef,
        }
    }

    /// Size of the payload content in bytes.
    pub fn len(&self) -> usize {
        match self {
            ClipboardPayload::Text(text) => text.len(),
            ClipboardPayload::Image(bytes)
            | ClipboardPayload::RichText(bytes)
            | ClipboardPayload::Pdf(bytes) => bytes.len(),
            ClipboardPayload::FileRef(path) => path.as_os_str().len(),
        }
    }

    /// Whether the payload carries no content.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for ClipboardPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}([{} bytes REDACTED])", self.kind(), self.len())
    }
}

/// A captured clipboard item.
///
/// Immutable once constructed. The content hash is computed at construction
/// time; it is `None` only when the payload cannot be canonicalized (a file
/// path that is not valid UTF-8). Such an entry can still be sent, but cannot
/// be deduplicated.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClipboardEntry {
    payload: ClipboardPayload,
    created_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    source_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content_hash: Option<ContentHash>,
}

impl ClipboardEntry {
    /// Capture a new entry, stamped with the current time.
    pub fn new(payload: ClipboardPayload, source_label: Option<String>) -> Self {
        let created_at = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self::with_created_at(payload, source_label, created_at)
    }

    /// Capture a new entry with an explicit creation timestamp (unix seconds).
    pub fn with_created_at(
        payload: ClipboardPayload,
        source_label: Option<String>,
        created_at: u64,
    ) -> Self {
        let content_hash = digest::hash_payload(&payload).ok();
        Self {
            payload,
            created_at,
            source_label,
            content_hash,
        }
    }

    /// The captured content.
    pub fn payload(&self) -> &ClipboardPayload {
        &self.payload
    }

    /// Creation time, unix seconds.
    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    /// Label of the application or device the content came from.
    pub fn source_label(&self) -> Option<&str> {
        self.source_label.as_deref()
    }

    /// The content hash computed when this entry was constructed.
    ///
    /// For an entry decoded off the wire this is whatever the sender put
    /// there; receivers recompute with [`crate::hash_payload`].
    pub fn content_hash(&self) -> Option<&ContentHash> {
        self.content_hash.as_ref()
    }
}

impl fmt::Debug for ClipboardEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClipboardEntry")
            .field("payload", &self.payload)
            .field("created_at", &self.created_at)
            .field("source_label", &self.source_label)
            .field("content_hash", &self.content_hash)
            .finish()
    }
}
