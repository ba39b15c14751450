//! Payload files and their user-visible ordering.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::ports::fs::PayloadFile;

/// File extension of managed payload files.
pub const PAYLOAD_EXT: &str = "bin";

/// Stable identity of a payload, assigned once at creation.
///
/// The backing file path changes on rename and when a file migrates between
/// the local and mirror roots, so it cannot serve as identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct PayloadId(String);

impl PayloadId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn inner(&self) -> &str {
        &self.0
    }
}

impl Default for PayloadId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PayloadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A boot image file under one of the payload roots.
///
/// Equality is identity-based: two payloads are equal iff their [`PayloadId`]s
/// match, regardless of path or metadata.
#[derive(Debug, Clone, Serialize)]
pub struct Payload {
    id: PayloadId,
    path: PathBuf,
    size: Option<u64>,
    modified: Option<DateTime<Utc>>,
}

impl Payload {
    pub fn from_file(file: PayloadFile) -> Self {
        Self {
            id: PayloadId::new(),
            path: file.path,
            size: Some(file.size),
            modified: file.modified,
        }
    }

    pub fn id(&self) -> &PayloadId {
        &self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name including the extension.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// User-visible name: the file stem.
    pub fn name(&self) -> String {
        self.path
            .file_stem()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn size(&self) -> Option<u64> {
        self.size
    }

    pub fn modified(&self) -> Option<DateTime<Utc>> {
        self.modified
    }

    /// Point the payload at a new backing file, keeping its identity.
    pub fn set_path(&mut self, path: PathBuf) {
        self.path = path;
    }

    /// Refresh cached path and metadata from a directory listing entry.
    pub fn update_from(&mut self, file: &PayloadFile) {
        self.path = file.path.clone();
        self.size = Some(file.size);
        self.modified = file.modified;
    }
}

impl PartialEq for Payload {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Payload {}

impl std::hash::Hash for Payload {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Replace path separators and colons in a requested payload name.
pub fn sanitize_name(name: &str) -> String {
    name.replace(['/', '\\', ':'], " ")
}

/// Sort listing entries by file name, case-insensitive.
pub fn sort_alphabetical(files: &mut [PayloadFile]) {
    files.sort_by(|a, b| {
        a.file_name()
            .to_lowercase()
            .cmp(&b.file_name().to_lowercase())
    });
}

/// Arrange a fresh listing according to a persisted explicit order.
///
/// Entries whose names appear in `explicit` come first, in that order;
/// the remainder is appended alphabetically.
pub fn order_by_explicit(mut found: Vec<PayloadFile>, explicit: &[String]) -> Vec<PayloadFile> {
    let mut result = Vec::with_capacity(found.len());
    for name in explicit {
        if let Some(pos) = found.iter().position(|f| f.file_name() == *name) {
            result.push(found.remove(pos));
        }
    }
    sort_alphabetical(&mut found);
    result.extend(found);
    result
}

/// Result of merging a fresh directory listing into the current sequence.
#[derive(Debug)]
pub struct MergeOutcome {
    /// The new ordered sequence.
    pub payloads: Vec<Payload>,
    /// Entries whose backing file disappeared.
    pub removed: Vec<Payload>,
    /// Whether anything observable changed.
    pub changed: bool,
}

/// Merge a fresh listing into the current sequence.
///
/// Entries still present keep their position and identity (path and cached
/// metadata are refreshed, which also migrates entries that moved between
/// roots); entries no longer present are dropped; newly discovered files are
/// appended alphabetically.
pub fn merge_listing(current: Vec<Payload>, mut found: Vec<PayloadFile>) -> MergeOutcome {
    sort_alphabetical(&mut found);

    let mut payloads = Vec::with_capacity(current.len());
    let mut removed = Vec::new();
    let mut changed = false;
    for mut payload in current {
        match found.iter().position(|f| f.file_name() == payload.file_name()) {
            Some(pos) => {
                let file = found.remove(pos);
                if payload.path() != file.path
                    || payload.size() != Some(file.size)
                    || payload.modified() != file.modified
                {
                    changed = true;
                }
                payload.update_from(&file);
                payloads.push(payload);
            }
            None => {
                changed = true;
                removed.push(payload);
            }
        }
    }

    if !found.is_empty() {
        changed = true;
    }
    payloads.extend(found.into_iter().map(Payload::from_file));

    MergeOutcome {
        payloads,
        removed,
        changed,
    }
}

/// Errors returned by payload store operations.
///
/// Store state is left unchanged when any of these is returned.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("\"{name}\" is too large for a payload ({size} bytes, limit {max}); it would not fit into IRAM")]
    SizeExceeded { name: String, size: u64, max: u64 },

    #[error("no payload named \"{0}\"")]
    UnknownPayload(String),

    #[error("position {0} is out of range")]
    BadIndex(usize),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
