//! Boot attempt lifecycle.

use serde::Serialize;

/// Outcome state of the most recent boot attempt.
///
/// At most one attempt is in progress at a time; the guard is the
/// [`BootAttempt::NotAttempted`] check performed on the control thread before
/// starting, not a lock. A finished attempt stays recorded until a new
/// device-connected transition or an explicit re-arm resets it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub enum BootAttempt {
    #[default]
    NotAttempted,
    InProgress,
    Succeeded,
    Failed(String),
}

impl BootAttempt {
    /// Whether a new attempt may start.
    pub fn can_start(&self) -> bool {
        matches!(self, BootAttempt::NotAttempted)
    }

    pub fn is_in_progress(&self) -> bool {
        matches!(self, BootAttempt::InProgress)
    }
}

impl std::fmt::Display for BootAttempt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BootAttempt::NotAttempted => write!(f, "not attempted"),
            BootAttempt::InProgress => write!(f, "in progress"),
            BootAttempt::Succeeded => write!(f, "succeeded"),
            BootAttempt::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}
