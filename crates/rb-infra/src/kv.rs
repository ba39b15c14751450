//! Persisted key-value state: one JSON document on disk.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::fs;

use rb_core::ports::KeyValueStorePort;

/// File-backed key-value store. Writes go through a temp file and a rename so
/// the document is never observed half-written.
pub struct FileKeyValueStore {
    path: PathBuf,
}

impl FileKeyValueStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn dir(&self) -> Option<&Path> {
        self.path.parent()
    }

    async fn load_map(&self) -> Result<Map<String, Value>> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Map::new());
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("read state failed: {}", self.path.display()))
            }
        };
        serde_json::from_str(&content)
            .with_context(|| format!("parse state failed: {}", self.path.display()))
    }

    async fn store_map(&self, map: &Map<String, Value>) -> Result<()> {
        if let Some(dir) = self.dir() {
            fs::create_dir_all(dir)
                .await
                .with_context(|| format!("create state dir failed: {}", dir.display()))?;
        }

        let content = serde_json::to_string_pretty(map).context("serialize state failed")?;
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, content)
            .await
            .with_context(|| format!("write temp state failed: {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &self.path).await.with_context(|| {
            format!(
                "rename temp state to target failed: {} -> {}",
                tmp_path.display(),
                self.path.display()
            )
        })?;
        Ok(())
    }
}

#[async_trait]
impl KeyValueStorePort for FileKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.load_map().await?.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut map = self.load_map().await?;
        map.insert(key.to_string(), value);
        self.store_map(&map).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut map = self.load_map().await?;
        if map.remove(key).is_some() {
            self.store_map(&map).await?;
        }
        Ok(())
    }
}

/// In-memory key-value store for tests.
#[derive(Default)]
pub struct MemoryKeyValueStore {
    map: Mutex<Map<String, Value>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStorePort for MemoryKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.map.lock().expect("state lock").get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.map
            .lock()
            .expect("state lock")
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.map.lock().expect("state lock").remove(key);
        Ok(())
    }
}
