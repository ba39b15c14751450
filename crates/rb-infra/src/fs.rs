//! Real-filesystem implementation of the payload files port.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::fs;

use rb_core::ports::{PayloadFile, PayloadFilesPort};

/// Payload file access backed by the local filesystem.
#[derive(Debug, Default, Clone)]
pub struct FsPayloadFiles;

impl FsPayloadFiles {
    pub fn new() -> Self {
        Self
    }

    async fn refuse_existing(to: &Path) -> io::Result<()> {
        if fs::try_exists(to).await? {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} already exists", to.display()),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl PayloadFilesPort for FsPayloadFiles {
    async fn ensure_root(&self, root: &Path) -> io::Result<()> {
        fs::create_dir_all(root).await
    }

    async fn exists(&self, path: &Path) -> bool {
        fs::try_exists(path).await.unwrap_or(false)
    }

    async fn list(&self, root: &Path, ext: &str) -> io::Result<Vec<PayloadFile>> {
        let mut entries = fs::read_dir(root).await?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ext) {
                continue;
            }
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            files.push(PayloadFile {
                path,
                size: metadata.len(),
                modified: metadata.modified().ok().map(DateTime::<Utc>::from),
            });
        }
        Ok(files)
    }

    async fn file_size(&self, path: &Path) -> io::Result<u64> {
        Ok(fs::metadata(path).await?.len())
    }

    async fn stat(&self, path: &Path) -> io::Result<PayloadFile> {
        let metadata = fs::metadata(path).await?;
        Ok(PayloadFile {
            path: path.to_path_buf(),
            size: metadata.len(),
            modified: metadata.modified().ok().map(DateTime::<Utc>::from),
        })
    }

    async fn copy(&self, from: &Path, to: &Path) -> io::Result<()> {
        Self::refuse_existing(to).await?;
        fs::copy(from, to).await?;
        Ok(())
    }

    async fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        // fs::rename would silently clobber an existing target on Unix.
        Self::refuse_existing(to).await?;
        fs::rename(from, to).await
    }

    async fn trash(&self, path: &Path) -> io::Result<Option<PathBuf>> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || trash::delete(&path))
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        // The platform trash API does not report the destination.
        Ok(None)
    }

    async fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(path).await
    }
}
