//! Single-writer control loop.
//!
//! All state transitions for the payload store, the device connection, and
//! the boot orchestrator happen here, on one task. Hot-plug callbacks,
//! filesystem refresh signals, finished boot outcomes, and user commands
//! arrive over channels and are applied in arrival order.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, warn};

use rb_core::boot::BootAttempt;
use rb_core::device::{Connection, DeviceEvent};
use rb_core::payload::{Payload, PayloadId, StoreError};
use rb_core::ports::{keys, KeyValueStorePort};

use crate::boot::{BootOrchestrator, BootOutcome, TriggerError};
use crate::store::PayloadStore;

/// Commands accepted by the control loop.
#[derive(Debug)]
pub enum AppCommand {
    Snapshot {
        reply: oneshot::Sender<AppState>,
    },
    Refresh {
        reply: oneshot::Sender<bool>,
    },
    Import {
        source: PathBuf,
        at: Option<usize>,
        name: Option<String>,
        move_file: bool,
        reply: oneshot::Sender<Result<Payload, StoreError>>,
    },
    Rename {
        name: String,
        new_name: String,
        reply: oneshot::Sender<Result<(), StoreError>>,
    },
    /// Trash the payload file and drop it from the sequence.
    Delete {
        name: String,
        reply: oneshot::Sender<Result<Option<PathBuf>, StoreError>>,
    },
    Reorder {
        from: usize,
        to: usize,
        reply: oneshot::Sender<Result<(), StoreError>>,
    },
    Select {
        name: Option<String>,
        reply: oneshot::Sender<Result<(), StoreError>>,
    },
    TriggerBoot {
        reply: oneshot::Sender<Result<(), TriggerError>>,
    },
    Rearm {
        reply: oneshot::Sender<()>,
    },
    SetAutoBoot {
        on: bool,
        reply: oneshot::Sender<()>,
    },
    Shutdown,
}

/// Observable snapshot of the whole pipeline, published after every change.
#[derive(Debug, Clone, Serialize)]
pub struct AppState {
    pub payloads: Vec<Payload>,
    pub selected: Option<PayloadId>,
    pub connection: Connection,
    pub attempt: BootAttempt,
    pub auto_boot: bool,
}

/// Handle given to the presentation layer: commands in, state snapshots out.
#[derive(Clone)]
pub struct RuntimeHandle {
    pub commands: mpsc::Sender<AppCommand>,
    pub state: watch::Receiver<AppState>,
}

pub struct Runtime {
    store: PayloadStore,
    connection: Connection,
    boot: BootOrchestrator,
    state_store: Arc<dyn KeyValueStorePort>,
    device_rx: mpsc::Receiver<DeviceEvent>,
    refresh_rx: mpsc::Receiver<PathBuf>,
    outcome_rx: mpsc::Receiver<BootOutcome>,
    command_rx: mpsc::Receiver<AppCommand>,
    state_tx: watch::Sender<AppState>,
    shutting_down: bool,
}

impl Runtime {
    pub fn new(
        store: PayloadStore,
        boot: BootOrchestrator,
        state_store: Arc<dyn KeyValueStorePort>,
        device_rx: mpsc::Receiver<DeviceEvent>,
        refresh_rx: mpsc::Receiver<PathBuf>,
        outcome_rx: mpsc::Receiver<BootOutcome>,
    ) -> (Self, RuntimeHandle) {
        let (command_tx, command_rx) = mpsc::channel(32);
        let connection = Connection::Idle;
        let initial = snapshot(&store, &connection, &boot);
        let (state_tx, state_rx) = watch::channel(initial);

        let runtime = Self {
            store,
            connection,
            boot,
            state_store,
            device_rx,
            refresh_rx,
            outcome_rx,
            command_rx,
            state_tx,
            shutting_down: false,
        };
        let handle = RuntimeHandle {
            commands: command_tx,
            state: state_rx,
        };
        (runtime, handle)
    }

    /// Run until a [`AppCommand::Shutdown`] arrives.
    pub async fn run(mut self) {
        while !self.shutting_down {
            tokio::select! {
                Some(event) = self.device_rx.recv() => {
                    self.handle_device_event(event);
                }
                Some(root) = self.refresh_rx.recv() => {
                    self.handle_refresh(root).await;
                }
                Some(outcome) = self.outcome_rx.recv() => {
                    self.handle_outcome(outcome);
                }
                Some(command) = self.command_rx.recv() => {
                    self.handle_command(command).await;
                }
                else => break,
            }
        }
        debug!("control loop stopped");
    }

    fn handle_device_event(&mut self, event: DeviceEvent) {
        if let DeviceEvent::Error(message) = &event {
            warn!(error = %message, "USB enumeration error");
        }
        let previous = self.connection.clone();
        if !self.connection.apply(event) {
            return;
        }
        debug!(from = ?previous, to = ?self.connection, "device transition");
        if let Connection::Connected(device) = &self.connection {
            let device = device.clone();
            let selected = self.store.selected_payload().cloned();
            self.boot.device_connected(&device, selected.as_ref());
        }
        self.publish();
    }

    async fn handle_refresh(&mut self, root: PathBuf) {
        debug!(root = %root.display(), "payload folder changed");
        if self.store.refresh().await {
            self.publish();
        }
    }

    fn handle_outcome(&mut self, outcome: BootOutcome) {
        self.boot.finish(outcome);
        self.publish();
    }

    async fn handle_command(&mut self, command: AppCommand) {
        match command {
            AppCommand::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            AppCommand::Refresh { reply } => {
                let changed = self.store.refresh().await;
                if changed {
                    self.publish();
                }
                let _ = reply.send(changed);
            }
            AppCommand::Import {
                source,
                at,
                name,
                move_file,
                reply,
            } => {
                let result = self
                    .store
                    .import(&source, at, name.as_deref(), move_file)
                    .await;
                if result.is_ok() {
                    self.publish();
                }
                let _ = reply.send(result);
            }
            AppCommand::Rename {
                name,
                new_name,
                reply,
            } => {
                let result = match self.resolve(&name) {
                    Ok(id) => self.store.rename(&id, &new_name).await,
                    Err(e) => Err(e),
                };
                if result.is_ok() {
                    self.publish();
                }
                let _ = reply.send(result);
            }
            AppCommand::Delete { name, reply } => {
                let result = match self.resolve(&name) {
                    Ok(id) => match self.store.delete(&id).await {
                        Ok(trashed) => {
                            self.store.remove(&id).await.map(|_| trashed)
                        }
                        Err(e) => Err(e),
                    },
                    Err(e) => Err(e),
                };
                if result.is_ok() {
                    self.publish();
                }
                let _ = reply.send(result);
            }
            AppCommand::Reorder { from, to, reply } => {
                let result = self.store.reorder(from, to).await;
                if result.is_ok() {
                    self.publish();
                }
                let _ = reply.send(result);
            }
            AppCommand::Select { name, reply } => {
                let result = match name {
                    Some(name) => match self.resolve(&name) {
                        Ok(id) => self.store.select(Some(&id)).await,
                        Err(e) => Err(e),
                    },
                    None => self.store.select(None).await,
                };
                if result.is_ok() {
                    self.publish();
                }
                let _ = reply.send(result);
            }
            AppCommand::TriggerBoot { reply } => {
                let selected = self.store.selected_payload().cloned();
                let result = self.boot.trigger(&self.connection, selected.as_ref());
                if result.is_ok() {
                    self.publish();
                }
                let _ = reply.send(result);
            }
            AppCommand::Rearm { reply } => {
                self.boot.rearm();
                self.publish();
                let _ = reply.send(());
            }
            AppCommand::SetAutoBoot { on, reply } => {
                let selected = self.store.selected_payload().cloned();
                self.boot.set_auto_boot(on, &self.connection, selected.as_ref());
                if let Err(error) = self.state_store.set(keys::AUTO_BOOT, json!(on)).await {
                    warn!(%error, "failed to persist auto-boot flag");
                }
                self.publish();
                let _ = reply.send(());
            }
            AppCommand::Shutdown => {
                self.shutting_down = true;
            }
        }
    }

    fn resolve(&self, name: &str) -> Result<PayloadId, StoreError> {
        self.store
            .find_by_name(name)
            .map(|p| p.id().clone())
            .ok_or_else(|| StoreError::UnknownPayload(name.to_string()))
    }

    fn snapshot(&self) -> AppState {
        snapshot(&self.store, &self.connection, &self.boot)
    }

    fn publish(&self) {
        self.state_tx.send_replace(self.snapshot());
    }
}

fn snapshot(store: &PayloadStore, connection: &Connection, boot: &BootOrchestrator) -> AppState {
    AppState {
        payloads: store.payloads().to_vec(),
        selected: store.selected_payload().map(|p| p.id().clone()),
        connection: connection.clone(),
        attempt: boot.attempt().clone(),
        auto_boot: boot.auto_boot(),
    }
}
