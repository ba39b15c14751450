//! Infrastructure adapters for rcmboot.
//!
//! Real-filesystem and JSON-document implementations of the rb-core ports,
//! plus in-memory doubles used by tests and headless dry runs.

pub mod fs;
pub mod kv;
pub mod memory;
pub mod telemetry;

pub use fs::FsPayloadFiles;
pub use kv::{FileKeyValueStore, MemoryKeyValueStore};
pub use memory::MemoryPayloadFiles;
pub use telemetry::{LogTelemetry, NoopTelemetry};
