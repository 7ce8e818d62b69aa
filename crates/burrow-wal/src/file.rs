//! Append-only WAL file management.

use burrow_common::{BurrowError, Result};
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

/// Handle to the WAL file, opened in create/append mode.
///
/// The handle itself is not synchronized; callers guard it with a mutex and
/// serialize appends through it. The handle can be closed and reopened so
/// truncation can rewrite the file underneath.
pub struct WalFile {
    path: PathBuf,
    file: Option<tokio::fs::File>,
    sync_on_write: bool,
}

impl WalFile {
    /// Opens (creating if needed) the WAL at `path` for appending.
    pub async fn open_append(path: impl Into<PathBuf>, sync_on_write: bool) -> Result<Self> {
        let path = path.into();
        let file = open_for_append(&path).await?;
        Ok(Self {
            path,
            file: Some(file),
            sync_on_write,
        })
    }

    /// Returns the WAL file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends pre-encoded frame bytes. One call, one contiguous write.
    pub async fn append(&mut self, frames: &[u8]) -> Result<()> {
        let file = self.file.as_mut().ok_or_else(|| BurrowError::FileSystem {
            path: self.path.clone(),
            operation: "write",
            source: std::io::Error::new(std::io::ErrorKind::Other, "WAL closed"),
        })?;
        file.write_all(frames)
            .await
            .map_err(|e| BurrowError::FileSystem {
                path: self.path.clone(),
                operation: "write",
                source: e,
            })?;
        file.flush().await.map_err(|e| BurrowError::FileSystem {
            path: self.path.clone(),
            operation: "write",
            source: e,
        })?;
        if self.sync_on_write {
            file.sync_data().await.map_err(|e| BurrowError::FileSystem {
                path: self.path.clone(),
                operation: "sync",
                source: e,
            })?;
        }
        Ok(())
    }

    /// Closes the underlying file handle. Appends fail until
    /// [`WalFile::reopen_append`] is called.
    pub async fn close(&mut self) -> Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush().await.map_err(|e| BurrowError::FileSystem {
                path: self.path.clone(),
                operation: "close",
                source: e,
            })?;
        }
        Ok(())
    }

    /// Reopens the file for appending after a close.
    pub async fn reopen_append(&mut self) -> Result<()> {
        self.file = Some(open_for_append(&self.path).await?);
        Ok(())
    }
}

async fn open_for_append(path: &Path) -> Result<tokio::fs::File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|e| BurrowError::FileSystem {
            path: path.to_path_buf(),
            operation: "create",
            source: e,
        })
}

/// Atomically replaces the file at `path` with `contents`: write a temporary
/// sibling, then rename it over the target.
pub fn replace_contents(path: &Path, contents: &[u8]) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    std::fs::write(&tmp, contents).map_err(|e| BurrowError::FileSystem {
        path: tmp.clone(),
        operation: "write",
        source: e,
    })?;
    std::fs::rename(&tmp, path).map_err(|e| BurrowError::FileSystem {
        path: path.to_path_buf(),
        operation: "rename",
        source: e,
    })
}
