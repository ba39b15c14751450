//! Filesystem port for the payload roots.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Directory listing entry: a payload candidate file with cached metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct PayloadFile {
    pub path: PathBuf,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

impl PayloadFile {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Filesystem operations the payload store needs.
///
/// Backed by the real filesystem in rb-infra, and by an in-memory double for
/// tests. All operations may be slow (the mirror root can be network-backed)
/// and must not be called while holding store state across the await.
#[async_trait]
pub trait PayloadFilesPort: Send + Sync {
    /// Create the root directory if it does not exist yet.
    async fn ensure_root(&self, root: &Path) -> io::Result<()>;

    async fn exists(&self, path: &Path) -> bool;

    /// Enumerate regular files carrying `ext` directly under `root`.
    async fn list(&self, root: &Path, ext: &str) -> io::Result<Vec<PayloadFile>>;

    async fn file_size(&self, path: &Path) -> io::Result<u64>;

    async fn stat(&self, path: &Path) -> io::Result<PayloadFile>;

    /// Copy a file. Fails if the destination already exists.
    async fn copy(&self, from: &Path, to: &Path) -> io::Result<()>;

    /// Move a file. Fails if the destination already exists.
    async fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;

    /// Relocate a file to the platform trash, not permanent deletion.
    /// Returns the trashed location when the platform reports it.
    async fn trash(&self, path: &Path) -> io::Result<Option<PathBuf>>;

    /// Read a file fully into memory.
    async fn read(&self, path: &Path) -> io::Result<Vec<u8>>;
}
