//! Sender side: read a file as a sequence of chunks.

use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::AsyncReadExt;

use crate::error::ContentError;

/// One chunk read from a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Position in the file, counting from 0
    pub index: u64,
    /// Raw bytes
    pub data: Vec<u8>,
    /// Whether this is the final chunk
    pub is_last: bool,
}

/// Reads a file in fixed-size chunks.
///
/// Always yields at least one chunk: an empty file produces a single empty
/// chunk marked last.
#[derive(Debug)]
pub struct ChunkReader {
    file: File,
    path: PathBuf,
    file_size: u64,
    chunk_size: usize,
    next_index: u64,
    remaining: u64,
    done: bool,
}

impl ChunkReader {
    /// Open `path` for reading in chunks of `chunk_size` bytes.
    pub async fn open(path: impl AsRef<Path>, chunk_size: usize) -> Result<Self, ContentError> {
        let path = path.as_ref().to_path_buf();
        let read_err = |source| ContentError::Read {
            path: path.clone(),
            source,
        };
        let file = File::open(&path).await.map_err(read_err)?;
        let file_size = file.metadata().await.map_err(read_err)?.len();
        Ok(Self {
            file,
            path,
            file_size,
            chunk_size: chunk_size.max(1),
            next_index: 0,
            remaining: file_size,
            done: false,
        })
    }

    /// Size of the file when it was opened.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Path being read.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the next chunk, or `None` after the last one.
    pub async fn next_chunk(&mut self) -> Result<Option<Chunk>, ContentError> {
        if self.done {
            return Ok(None);
        }
        let len = self.remaining.min(self.chunk_size as u64) as usize;
        let mut data = vec![0u8; len];
        self.file
            .read_exact(&mut data)
            .await
            .map_err(|source| ContentError::Read {
                path: self.path.clone(),
                source,
            })?;

        self.remaining -= len as u64;
        let is_last = self.remaining == 0;
        self.done = is_last;

        let chunk = Chunk {
            index: self.next_index,
            data,
            is_last,
        };
        self.next_index += 1;
        Ok(Some(chunk))
    }
}

/// Read up to `limit` leading bytes of a file, for content sniffing.
pub async fn read_head(path: impl AsRef<Path>, limit: usize) -> Result<Vec<u8>, ContentError> {
    let path = path.as_ref();
    let read_err = |source| ContentError::Read {
        path: path.to_path_buf(),
        source,
    };
    let file = File::open(path).await.map_err(read_err)?;
    let mut head = Vec::with_capacity(limit);
    file.take(limit as u64)
        .read_to_end(&mut head)
        .await
        .map_err(read_err)?;
    Ok(head)
}
