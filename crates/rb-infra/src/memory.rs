//! In-memory payload filesystem double.

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use rb_core::ports::{PayloadFile, PayloadFilesPort};

#[derive(Clone)]
struct MemFile {
    data: Vec<u8>,
    modified: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct State {
    dirs: HashSet<PathBuf>,
    files: HashMap<PathBuf, MemFile>,
    fail_listing: bool,
}

/// Payload file access over an in-memory map instead of a disk.
///
/// Behaves like the real adapter for the operations the store exercises,
/// including refusing to clobber existing destinations. Trash relocates into
/// a fake `/trash` directory and reports the destination.
#[derive(Default)]
pub struct MemoryPayloadFiles {
    inner: Mutex<State>,
}

impl MemoryPayloadFiles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a file with explicit contents.
    pub fn add_file(&self, path: impl Into<PathBuf>, data: Vec<u8>) {
        let mut state = self.inner.lock().expect("fs lock");
        state.files.insert(
            path.into(),
            MemFile {
                data,
                modified: None,
            },
        );
    }

    /// Seed a file of a given size without materializing contents elsewhere.
    pub fn add_sized(&self, path: impl Into<PathBuf>, size: usize) {
        self.add_file(path, vec![0u8; size]);
    }

    /// Simulate an external deletion (the file vanishes without the store
    /// being told).
    pub fn remove_file(&self, path: &Path) {
        self.inner.lock().expect("fs lock").files.remove(path);
    }

    /// Simulate a root directory vanishing (e.g. a mirror going offline).
    pub fn remove_dir(&self, path: &Path) {
        self.inner.lock().expect("fs lock").dirs.remove(path);
    }

    /// Make subsequent listings fail, as an unreadable directory would.
    pub fn fail_listing(&self, fail: bool) {
        self.inner.lock().expect("fs lock").fail_listing = fail;
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.inner
            .lock()
            .expect("fs lock")
            .files
            .contains_key(path)
    }

    pub fn file_names_in(&self, dir: &Path) -> Vec<String> {
        let state = self.inner.lock().expect("fs lock");
        let mut names: Vec<String> = state
            .files
            .keys()
            .filter(|p| p.parent() == Some(dir))
            .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect();
        names.sort();
        names
    }

    fn not_found(path: &Path) -> io::Error {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("{} not found", path.display()),
        )
    }

    fn already_exists(path: &Path) -> io::Error {
        io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("{} already exists", path.display()),
        )
    }
}

#[async_trait]
impl PayloadFilesPort for MemoryPayloadFiles {
    async fn ensure_root(&self, root: &Path) -> io::Result<()> {
        self.inner
            .lock()
            .expect("fs lock")
            .dirs
            .insert(root.to_path_buf());
        Ok(())
    }

    async fn exists(&self, path: &Path) -> bool {
        let state = self.inner.lock().expect("fs lock");
        state.files.contains_key(path) || state.dirs.contains(path)
    }

    async fn list(&self, root: &Path, ext: &str) -> io::Result<Vec<PayloadFile>> {
        let state = self.inner.lock().expect("fs lock");
        if state.fail_listing {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "listing failure injected",
            ));
        }
        let mut files: Vec<PayloadFile> = state
            .files
            .iter()
            .filter(|(path, _)| {
                path.parent() == Some(root)
                    && path.extension().and_then(|e| e.to_str()) == Some(ext)
            })
            .map(|(path, file)| PayloadFile {
                path: path.clone(),
                size: file.data.len() as u64,
                modified: file.modified,
            })
            .collect();
        files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(files)
    }

    async fn file_size(&self, path: &Path) -> io::Result<u64> {
        let state = self.inner.lock().expect("fs lock");
        state
            .files
            .get(path)
            .map(|f| f.data.len() as u64)
            .ok_or_else(|| Self::not_found(path))
    }

    async fn stat(&self, path: &Path) -> io::Result<PayloadFile> {
        let state = self.inner.lock().expect("fs lock");
        state
            .files
            .get(path)
            .map(|f| PayloadFile {
                path: path.to_path_buf(),
                size: f.data.len() as u64,
                modified: f.modified,
            })
            .ok_or_else(|| Self::not_found(path))
    }

    async fn copy(&self, from: &Path, to: &Path) -> io::Result<()> {
        let mut state = self.inner.lock().expect("fs lock");
        if state.files.contains_key(to) {
            return Err(Self::already_exists(to));
        }
        let file = state
            .files
            .get(from)
            .cloned()
            .ok_or_else(|| Self::not_found(from))?;
        state.files.insert(to.to_path_buf(), file);
        Ok(())
    }

    async fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        let mut state = self.inner.lock().expect("fs lock");
        if state.files.contains_key(to) {
            return Err(Self::already_exists(to));
        }
        let file = state
            .files
            .remove(from)
            .ok_or_else(|| Self::not_found(from))?;
        state.files.insert(to.to_path_buf(), file);
        Ok(())
    }

    async fn trash(&self, path: &Path) -> io::Result<Option<PathBuf>> {
        let mut state = self.inner.lock().expect("fs lock");
        let file = state
            .files
            .remove(path)
            .ok_or_else(|| Self::not_found(path))?;
        let trashed = Path::new("/trash").join(path.file_name().unwrap_or_default());
        state.files.insert(trashed.clone(), file);
        Ok(Some(trashed))
    }

    async fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        let state = self.inner.lock().expect("fs lock");
        state
            .files
            .get(path)
            .map(|f| f.data.clone())
            .ok_or_else(|| Self::not_found(path))
    }
}
