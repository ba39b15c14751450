//! rcmboot application layer.
//!
//! Owns all mutable state: the payload store, the device connection, and the
//! boot attempt. Everything is driven from a single control loop
//! ([`runtime::Runtime`]); hot-plug and filesystem events arrive over
//! channels from the platform layer.

pub mod boot;
pub mod runtime;
pub mod store;

pub use boot::{BootError, BootOrchestrator, BootOutcome, TriggerError};
pub use runtime::{AppCommand, AppState, Runtime, RuntimeHandle};
pub use store::PayloadStore;
