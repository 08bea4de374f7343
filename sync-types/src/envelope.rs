//! SyncEnvelope - the wire message.
//!
//! The envelope is serialized to JSON and then sealed as a whole; nothing
//! about it is visible on the network except the frame length.

use serde::{Deserialize, Serialize};

use crate::{ContentHash, Payload, SyncError};

/// Current protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

/// A single wire message carrying exactly one payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncEnvelope {
    /// Protocol version (currently 1)
    pub version: u8,
    /// Sender's device name
    pub origin: String,
    /// Sender-computed content hash, a dedup hint only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<ContentHash>,
    /// The payload
    pub payload: Payload,
}

impl SyncEnvelope {
    /// Create a new envelope for sending.
    pub fn new(
        origin: impl Into<String>,
        content_hash: Option<ContentHash>,
        payload: Payload,
    ) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            origin: origin.into(),
            content_hash,
            payload,
        }
    }

    /// Serialize to JSON bytes.
    pub fn to_json(&self) -> Result<Vec<u8>, SyncError> {
        serde_json::to_vec(self).map_err(SyncError::Serialization)
    }

    /// Deserialize from JSON bytes.
    pub fn from_json(bytes: &[u8]) -> Result<Self, SyncError> {
        serde_json::from_slice(bytes).map_err(SyncError::Deserialization)
    }
}
