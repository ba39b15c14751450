//! Payload store: the single source of truth for payload files, their order,
//! and the current boot selection.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use serde_json::json;
use tracing::{debug, warn};

use rb_core::payload::{
    merge_listing, order_by_explicit, sanitize_name, Payload, PayloadId, StoreError, PAYLOAD_EXT,
};
use rb_core::ports::{keys, KeyValueStorePort, PayloadFilesPort};
use rb_core::rcm;

/// Ordered payload sequence over one or two root directories.
///
/// When a mirror root is configured and present it is the effective root
/// (the cloud-synced copy wins); otherwise the local root is. Only the
/// effective root is enumerated, but availability is re-resolved on every
/// refresh so a mirror appearing or vanishing takes effect without restart.
pub struct PayloadStore {
    local_root: PathBuf,
    mirror_root: Option<PathBuf>,
    effective_root: PathBuf,
    payloads: Vec<Payload>,
    selected: Option<PayloadId>,
    files: Arc<dyn PayloadFilesPort>,
    state: Arc<dyn KeyValueStorePort>,
}

impl PayloadStore {
    /// Build the store and load the initial sequence.
    ///
    /// The persisted explicit order is applied first; files it does not name
    /// follow alphabetically. Failure to create or enumerate the root is
    /// fatal: without payload storage the application cannot proceed.
    pub async fn new(
        local_root: PathBuf,
        mirror_root: Option<PathBuf>,
        files: Arc<dyn PayloadFilesPort>,
        state: Arc<dyn KeyValueStorePort>,
    ) -> anyhow::Result<Self> {
        files
            .ensure_root(&local_root)
            .await
            .with_context(|| format!("create payloads root {}", local_root.display()))?;

        let mut store = Self {
            effective_root: local_root.clone(),
            local_root,
            mirror_root,
            payloads: Vec::new(),
            selected: None,
            files,
            state,
        };

        store.effective_root = store.resolve_effective_root().await;
        let found = store
            .files
            .list(&store.effective_root, PAYLOAD_EXT)
            .await
            .with_context(|| format!("list payloads in {}", store.effective_root.display()))?;

        let explicit = store.load_explicit_order().await;
        store.payloads = order_by_explicit(found, &explicit)
            .into_iter()
            .map(Payload::from_file)
            .collect();

        if let Some(name) = store.load_selected_name().await {
            store.selected = store
                .payloads
                .iter()
                .find(|p| p.file_name() == name)
                .map(|p| p.id().clone());
        }

        store.persist_order().await;
        Ok(store)
    }

    pub fn payloads(&self) -> &[Payload] {
        &self.payloads
    }

    pub fn selected_payload(&self) -> Option<&Payload> {
        let id = self.selected.as_ref()?;
        self.payloads.iter().find(|p| p.id() == id)
    }

    pub fn effective_root(&self) -> &Path {
        &self.effective_root
    }

    pub fn find_by_name(&self, name: &str) -> Option<&Payload> {
        self.payloads
            .iter()
            .find(|p| p.file_name() == name || p.name() == name)
    }

    /// Re-enumerate the effective root and merge into the current sequence.
    ///
    /// Returns whether anything observable changed. Enumeration failures are
    /// logged and absorbed; the previous in-memory sequence is kept and a
    /// later successful refresh self-heals.
    pub async fn refresh(&mut self) -> bool {
        let root = self.resolve_effective_root().await;
        let found = match self.files.list(&root, PAYLOAD_EXT).await {
            Ok(found) => found,
            Err(error) => {
                warn!(%error, root = %root.display(), "payload refresh failed; keeping previous list");
                return false;
            }
        };
        self.effective_root = root;

        let current = std::mem::take(&mut self.payloads);
        let outcome = merge_listing(current, found);
        self.payloads = outcome.payloads;

        for removed in &outcome.removed {
            debug!(payload = %removed.file_name(), "payload disappeared");
            if self.selected.as_ref() == Some(removed.id()) {
                self.selected = None;
                self.persist_selected().await;
            }
        }

        if outcome.changed {
            self.persist_order().await;
        }
        outcome.changed
    }

    /// Copy (or move) a file into the effective root and register it.
    ///
    /// The file operation may be slow (network-backed mirror) and runs as its
    /// own task; the caller suspends until it completes. Nothing is mutated
    /// unless the whole operation succeeds.
    pub async fn import(
        &mut self,
        source: &Path,
        at: Option<usize>,
        name: Option<&str>,
        move_file: bool,
    ) -> Result<Payload, StoreError> {
        let name = match name {
            Some(name) => sanitize_name(name),
            None => source
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "payload".to_string()),
        };
        let dest = self
            .effective_root
            .join(format!("{name}.{ext}", ext = PAYLOAD_EXT));

        let files = Arc::clone(&self.files);
        let source = source.to_path_buf();
        let dest_for_op = dest.clone();
        let op = tokio::spawn(async move {
            let size = files.file_size(&source).await?;
            if size > rcm::MAX_PAYLOAD_SIZE {
                return Err(StoreError::SizeExceeded {
                    name: source
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default(),
                    size,
                    max: rcm::MAX_PAYLOAD_SIZE,
                });
            }
            if move_file {
                files.rename(&source, &dest_for_op).await?;
            } else {
                files.copy(&source, &dest_for_op).await?;
            }
            Ok(())
        });
        op.await
            .map_err(|e| StoreError::Io(io::Error::new(io::ErrorKind::Other, e)))??;

        let file = self.files.stat(&dest).await?;
        let payload = Payload::from_file(file);
        let index = at
            .filter(|i| *i <= self.payloads.len())
            .unwrap_or(self.payloads.len());
        self.payloads.insert(index, payload.clone());
        self.persist_order().await;
        Ok(payload)
    }

    /// Move the backing file to a new name under its current root.
    ///
    /// The payload keeps its identity; only path and persisted names change.
    /// Fails with the underlying filesystem error (e.g. a name collision)
    /// and leaves the store untouched in that case.
    pub async fn rename(&mut self, id: &PayloadId, new_name: &str) -> Result<(), StoreError> {
        let pos = self.position(id)?;
        let name = sanitize_name(new_name);
        let old_path = self.payloads[pos].path().to_path_buf();
        let dir = old_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.effective_root.clone());
        let new_path = dir.join(format!("{name}.{ext}", ext = PAYLOAD_EXT));

        self.files.rename(&old_path, &new_path).await?;
        self.payloads[pos].set_path(new_path);
        self.persist_order().await;
        if self.selected.as_ref() == Some(id) {
            // selection is persisted by file name
            self.persist_selected().await;
        }
        Ok(())
    }

    /// Move the backing file to the platform trash.
    ///
    /// Returns the trash location when known so the caller can offer undo.
    /// Removing the entry from the sequence is the caller's responsibility
    /// (via [`PayloadStore::remove`]); the two are decoupled so callers can
    /// implement undo on top.
    pub async fn delete(&self, id: &PayloadId) -> Result<Option<PathBuf>, StoreError> {
        let pos = self.position(id)?;
        let path = self.payloads[pos].path().to_path_buf();
        Ok(self.files.trash(&path).await?)
    }

    /// Drop an entry from the sequence, clearing the selection with it when
    /// it was the selected payload.
    pub async fn remove(&mut self, id: &PayloadId) -> Result<Payload, StoreError> {
        let pos = self.position(id)?;
        let payload = self.payloads.remove(pos);
        if self.selected.as_ref() == Some(id) {
            self.selected = None;
            self.persist_selected().await;
        }
        self.persist_order().await;
        Ok(payload)
    }

    /// Move the entry at `from` to position `to`.
    pub async fn reorder(&mut self, from: usize, to: usize) -> Result<(), StoreError> {
        if from >= self.payloads.len() {
            return Err(StoreError::BadIndex(from));
        }
        let to = to.min(self.payloads.len() - 1);
        let payload = self.payloads.remove(from);
        self.payloads.insert(to, payload);
        self.persist_order().await;
        Ok(())
    }

    /// Select a payload (which must be in the sequence), or clear the selection.
    pub async fn select(&mut self, id: Option<&PayloadId>) -> Result<(), StoreError> {
        match id {
            Some(id) => {
                self.position(id)?;
                self.selected = Some(id.clone());
            }
            None => self.selected = None,
        }
        self.persist_selected().await;
        Ok(())
    }

    fn position(&self, id: &PayloadId) -> Result<usize, StoreError> {
        self.payloads
            .iter()
            .position(|p| p.id() == id)
            .ok_or_else(|| StoreError::UnknownPayload(id.to_string()))
    }

    async fn resolve_effective_root(&self) -> PathBuf {
        if let Some(mirror) = &self.mirror_root {
            if self.files.exists(mirror).await {
                return mirror.clone();
            }
        }
        self.local_root.clone()
    }

    async fn load_explicit_order(&self) -> Vec<String> {
        match self.state.get(keys::PAYLOAD_ORDER).await {
            Ok(Some(value)) => serde_json::from_value(value).unwrap_or_else(|error| {
                warn!(%error, "persisted payload order is malformed; ignoring");
                Vec::new()
            }),
            Ok(None) => Vec::new(),
            Err(error) => {
                warn!(%error, "failed to load persisted payload order");
                Vec::new()
            }
        }
    }

    async fn load_selected_name(&self) -> Option<String> {
        match self.state.get(keys::SELECTED_PAYLOAD).await {
            Ok(value) => value.and_then(|v| v.as_str().map(str::to_string)),
            Err(error) => {
                warn!(%error, "failed to load persisted payload selection");
                None
            }
        }
    }

    /// Persist the current file-name order. Runs after every sequence
    /// mutation; failures are logged and absorbed.
    async fn persist_order(&self) {
        let names: Vec<String> = self.payloads.iter().map(|p| p.file_name()).collect();
        if let Err(error) = self.state.set(keys::PAYLOAD_ORDER, json!(names)).await {
            warn!(%error, "failed to persist payload order");
        }
    }

    async fn persist_selected(&self) {
        let result = match self.selected_payload() {
            Some(payload) => {
                self.state
                    .set(keys::SELECTED_PAYLOAD, json!(payload.file_name()))
                    .await
            }
            None => self.state.remove(keys::SELECTED_PAYLOAD).await,
        };
        if let Err(error) = result {
            warn!(%error, "failed to persist payload selection");
        }
    }
}
