//! Boot outcome reporting implementations.

use tracing::{info, warn};

use rb_core::ports::TelemetryPort;

/// Reports outcomes to the structured log.
pub struct LogTelemetry;

impl TelemetryPort for LogTelemetry {
    fn boot_succeeded(&self, payload_name: &str) {
        info!(payload = payload_name, "boot succeeded");
    }

    fn boot_failed(&self, payload_name: &str, error: &str) {
        warn!(payload = payload_name, error, "boot failed");
    }
}

/// Discards outcomes.
pub struct NoopTelemetry;

impl TelemetryPort for NoopTelemetry {
    fn boot_succeeded(&self, _payload_name: &str) {}

    fn boot_failed(&self, _payload_name: &str, _error: &str) {}
}
