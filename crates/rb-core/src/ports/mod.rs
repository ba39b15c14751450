//! Ports: interfaces to infrastructure collaborators.

pub mod fs;
pub mod kv;
pub mod telemetry;
pub mod usb;

pub use fs::{PayloadFile, PayloadFilesPort};
pub use kv::{keys, KeyValueStorePort};
pub use telemetry::TelemetryPort;
pub use usb::{ExecError, RcmExecPort};
