//! Receiver side: append chunks to a destination file.

use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::error::ContentError;

/// An open destination file for one incoming transfer.
#[derive(Debug)]
pub struct FileSink {
    file: File,
    path: PathBuf,
    written: u64,
}

impl FileSink {
    /// Create (or truncate) the destination file.
    ///
    /// The parent directory is created if missing.
    pub async fn create(path: impl AsRef<Path>) -> Result<Self, ContentError> {
        let path = path.as_ref().to_path_buf();
        let storage_err = |source| ContentError::Storage {
            path: path.clone(),
            source,
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(storage_err)?;
        }
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .await
            .map_err(storage_err)?;
        Ok(Self {
            file,
            path,
            written: 0,
        })
    }

    /// Append bytes to the file.
    pub async fn append(&mut self, data: &[u8]) -> Result<(), ContentError> {
        self.file
            .write_all(data)
            .await
            .map_err(|source| ContentError::Storage {
                path: self.path.clone(),
                source,
            })?;
        self.written += data.len() as u64;
        Ok(())
    }

    /// Flush everything to disk and close the file.
    pub async fn finish(mut self) -> Result<PathBuf, ContentError> {
        let storage_err = |source| ContentError::Storage {
            path: self.path.clone(),
            source,
        };
        self.file.flush().await.map_err(storage_err)?;
        self.file.sync_all().await.map_err(storage_err)?;
        Ok(self.path)
    }

    /// Close and delete the partial file.
    pub async fn discard(self) -> Result<(), ContentError> {
        let Self { file, path, .. } = self;
        drop(file);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(ContentError::Storage { path, source }),
        }
    }

    /// Destination path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes appended so far.
    pub fn written(&self) -> u64 {
        self.written
    }
}

/// Highest numeric suffix tried before giving up on a free name.
const MAX_NAME_SUFFIX: u32 = 9999;

/// Move a finished file into `dir` under `name` without replacing anything.
///
/// If `name` is taken, `name (1).ext`, `name (2).ext` and so on are tried.
/// The target is claimed with `create_new` before the rename, so two
/// transfers finishing with the same name never share a path.
pub async fn persist_unique(
    finished: &Path,
    dir: &Path,
    name: &str,
) -> Result<PathBuf, ContentError> {
    for n in 0..=MAX_NAME_SUFFIX {
        let target = dir.join(numbered_name(name, n));
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target)
            .await
        {
            Ok(placeholder) => {
                drop(placeholder);
                if let Err(source) = tokio::fs::rename(finished, &target).await {
                    if let Err(e) = tokio::fs::remove_file(&target).await {
                        tracing::debug!(path = %target.display(), error = %e, "placeholder not removed");
                    }
                    return Err(ContentError::Storage {
                        path: target,
                        source,
                    });
                }
                return Ok(target);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(source) => {
                return Err(ContentError::Storage {
                    path: target,
                    source,
                })
            }
        }
    }
    Err(ContentError::Storage {
        path: dir.join(name),
        source: std::io::Error::new(std::io::ErrorKind::AlreadyExists, "no free file name"),
    })
}

/// `report.pdf` -> `report (n).pdf`; `n == 0` leaves the name alone.
fn numbered_name(name: &str, n: u32) -> String {
    if n == 0 {
        return name.to_string();
    }
    match name.rfind('.') {
        Some(dot) if dot > 0 => format!("{} ({n}){}", &name[..dot], &name[dot..]),
        _ => format!("{name} ({n})"),
    }
}
