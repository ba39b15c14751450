//! Boot orchestrator: decides when the native execute call happens and
//! records its outcome.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use rb_core::boot::BootAttempt;
use rb_core::device::{Connection, RcmDevice};
use rb_core::payload::Payload;
use rb_core::ports::{ExecError, PayloadFilesPort, RcmExecPort, TelemetryPort};

#[derive(Debug, thiserror::Error)]
pub enum BootError {
    #[error("could not read payload: {0}")]
    Read(#[from] std::io::Error),

    #[error(transparent)]
    Exec(#[from] ExecError),
}

/// Why a manual trigger was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TriggerError {
    #[error("no device connected in RCM mode")]
    NoDevice,

    #[error("no payload selected")]
    NoPayload,

    #[error("a boot attempt is already in progress")]
    InProgress,

    #[error("the last attempt already finished; re-arm to boot again")]
    AlreadyAttempted,
}

/// Result of a finished boot task, delivered back to the control loop.
#[derive(Debug)]
pub struct BootOutcome {
    pub payload_name: String,
    pub result: Result<(), BootError>,
}

/// Coordinates selected payload, connected device, and auto-boot policy into
/// at most one running boot attempt.
///
/// All transitions happen on the control thread; the at-most-one-attempt
/// invariant is enforced by the [`BootAttempt::NotAttempted`] guard, not a
/// lock. The transfer itself runs as a spawned task and reports back through
/// the outcome channel.
pub struct BootOrchestrator {
    attempt: BootAttempt,
    auto_boot: bool,
    bootstrap: Arc<Vec<u8>>,
    exec: Arc<dyn RcmExecPort>,
    files: Arc<dyn PayloadFilesPort>,
    telemetry: Arc<dyn TelemetryPort>,
    outcome_tx: mpsc::Sender<BootOutcome>,
}

impl BootOrchestrator {
    pub fn new(
        bootstrap: Vec<u8>,
        auto_boot: bool,
        exec: Arc<dyn RcmExecPort>,
        files: Arc<dyn PayloadFilesPort>,
        telemetry: Arc<dyn TelemetryPort>,
        outcome_tx: mpsc::Sender<BootOutcome>,
    ) -> Self {
        Self {
            attempt: BootAttempt::NotAttempted,
            auto_boot,
            bootstrap: Arc::new(bootstrap),
            exec,
            files,
            telemetry,
            outcome_tx,
        }
    }

    pub fn attempt(&self) -> &BootAttempt {
        &self.attempt
    }

    pub fn auto_boot(&self) -> bool {
        self.auto_boot
    }

    /// Toggle the auto-boot policy. Switching it on boots a device that is
    /// already connected, provided a payload is selected and no attempt has
    /// been made on this connection yet.
    pub fn set_auto_boot(&mut self, on: bool, connection: &Connection, selected: Option<&Payload>) {
        self.auto_boot = on;
        if !on {
            return;
        }
        if let (Some(device), Some(payload)) = (connection.device(), selected) {
            if self.attempt.can_start() {
                info!("auto-booting already connected device");
                self.start(device.clone(), payload.clone());
            }
        }
    }

    /// A new device-connected transition was applied to the connection state.
    ///
    /// A fresh physical connection is a fresh opportunity to boot, so the
    /// attempt state resets, and auto-boot fires when the policy is on. If an
    /// attempt is running the transition is ignored: the running attempt will
    /// fail on its own if the device really went away.
    pub fn device_connected(&mut self, device: &RcmDevice, selected: Option<&Payload>) {
        let Some(payload) = selected else { return };
        if self.attempt.is_in_progress() {
            debug!(device = %device, "device transition during boot; leaving attempt untouched");
            return;
        }
        self.attempt = BootAttempt::NotAttempted;
        if self.auto_boot {
            info!(device = %device, "auto-booting newly connected device");
            self.start(device.clone(), payload.clone());
        }
    }

    /// Explicit user trigger.
    pub fn trigger(
        &mut self,
        connection: &Connection,
        selected: Option<&Payload>,
    ) -> Result<(), TriggerError> {
        let device = connection.device().ok_or(TriggerError::NoDevice)?;
        let payload = selected.ok_or(TriggerError::NoPayload)?;
        match self.attempt {
            BootAttempt::InProgress => return Err(TriggerError::InProgress),
            BootAttempt::Succeeded | BootAttempt::Failed(_) => {
                return Err(TriggerError::AlreadyAttempted)
            }
            BootAttempt::NotAttempted => {}
        }
        self.start(device.clone(), payload.clone());
        Ok(())
    }

    /// Re-arm after a finished attempt. No-op while a boot is running.
    pub fn rearm(&mut self) {
        if !self.attempt.is_in_progress() {
            self.attempt = BootAttempt::NotAttempted;
        }
    }

    fn start(&mut self, device: RcmDevice, payload: Payload) {
        self.attempt = BootAttempt::InProgress;
        let files = Arc::clone(&self.files);
        let exec = Arc::clone(&self.exec);
        let bootstrap = Arc::clone(&self.bootstrap);
        let outcome_tx = self.outcome_tx.clone();
        let payload_name = payload.name();
        let path = payload.path().to_path_buf();
        info!(payload = %payload_name, device = %device, "boot attempt started");

        tokio::spawn(async move {
            let result = async {
                let bytes = files.read(&path).await.map_err(BootError::Read)?;
                exec.execute(device.id, &bootstrap, &bytes)
                    .await
                    .map_err(BootError::Exec)
            }
            .await;
            if outcome_tx
                .send(BootOutcome {
                    payload_name,
                    result,
                })
                .await
                .is_err()
            {
                debug!("control loop gone before boot outcome could be delivered");
            }
        });
    }

    /// Record a finished attempt and notify telemetry.
    pub fn finish(&mut self, outcome: BootOutcome) {
        match outcome.result {
            Ok(()) => {
                self.attempt = BootAttempt::Succeeded;
                self.telemetry.boot_succeeded(&outcome.payload_name);
            }
            Err(error) => {
                let message = error.to_string();
                warn!(payload = %outcome.payload_name, error = %message, "boot attempt failed");
                self.attempt = BootAttempt::Failed(message.clone());
                self.telemetry.boot_failed(&outcome.payload_name, &message);
            }
        }
    }
}
