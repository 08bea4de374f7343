//! # sync-content
//!
//! File content handling for lanclip transfers.
//!
//! Files too large for a single envelope are split into chunks by the
//! sender and reassembled by the receiver:
//!
//! ```text
//! sender:   file -> ChunkReader -> [compress?] -> chunk envelopes
//! receiver: chunk envelopes -> [decompress] -> FileSink -> .part file -> persist_unique -> file
//! ```
//!
//! Compression is only attempted when [`should_compress`] says it is worth
//! it; [`compress`] may still decline, in which case the raw bytes are sent.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod compress;
mod error;
mod reader;
mod sink;

pub use compress::{
    compress, decompress, shannon_entropy, should_compress, COMPRESSION_LEVEL,
    MAX_COMPRESSIBLE_ENTROPY, MIN_COMPRESS_LEN,
};
pub use error::{CompressionError, ContentError};
pub use reader::{read_head, Chunk, ChunkReader};
pub use sink::{persist_unique, FileSink};
