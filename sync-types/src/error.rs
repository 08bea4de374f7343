//! Error types for lanclip wire and data-model operations.

use thiserror::Error;

/// Errors that can occur in lanclip type-level operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// JSON serialization failed
    #[error("serialization failed: {0}")]
    Serialization(#[source] serde_json::Error),

    /// JSON deserialization failed
    #[error("deserialization failed: {0}")]
    Deserialization(#[source] serde_json::Error),

    /// Content cannot be represented as UTF-8 text, so it cannot be hashed
    #[error("content is not representable as UTF-8: {0}")]
    Encoding(String),
}
