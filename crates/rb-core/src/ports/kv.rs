//! Key-value persistence for small bits of application state.

use async_trait::async_trait;

/// Persisted state keys.
pub mod keys {
    /// Explicit payload ordering: array of file names in sequence order.
    pub const PAYLOAD_ORDER: &str = "payload_order";
    /// File name of the selected boot payload.
    pub const SELECTED_PAYLOAD: &str = "selected_payload";
    /// Whether a connected device is booted without user action.
    pub const AUTO_BOOT: &str = "auto_boot";
}

/// Small persistent key-value store, one JSON document on disk.
#[async_trait]
pub trait KeyValueStorePort: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<serde_json::Value>>;
    async fn set(&self, key: &str, value: serde_json::Value) -> anyhow::Result<()>;
    async fn remove(&self, key: &str) -> anyhow::Result<()>;
}
