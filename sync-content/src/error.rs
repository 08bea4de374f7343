//! Error types for sync-content.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur reading or writing transferred files.
#[derive(Error, Debug)]
pub enum ContentError {
    /// Reading the source file failed.
    #[error("failed to read {path}: {source}")]
    Read {
        /// File being read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Writing the destination file failed; the transfer cannot continue.
    #[error("failed to write {path}: {source}")]
    Storage {
        /// File being written.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Errors from [`decompress`](crate::decompress).
#[derive(Error, Debug)]
pub enum CompressionError {
    /// The compressed stream is corrupt or larger than the stated length.
    #[error("corrupt compressed data: {0}")]
    Corrupt(#[source] std::io::Error),

    /// The stream decoded to a different length than stated.
    #[error("decompressed length {actual} does not match expected {expected}")]
    LengthMismatch {
        /// Length the sender announced.
        expected: usize,
        /// Length actually recovered.
        actual: usize,
    },
}
