//! Optional boot outcome reporting.

/// Collaborator notified about finished boot attempts.
pub trait TelemetryPort: Send + Sync {
    fn boot_succeeded(&self, payload_name: &str);
    fn boot_failed(&self, payload_name: &str, error: &str);
}
