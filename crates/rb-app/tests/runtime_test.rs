//! Control-loop behavior: events and commands arriving over channels.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{timeout, Duration};

use rb_app::{AppCommand, AppState, BootOrchestrator, PayloadStore, Runtime, RuntimeHandle};
use rb_core::boot::BootAttempt;
use rb_core::device::{Connection, DeviceEvent, DeviceId, RcmDevice};
use rb_core::ports::{
    keys, ExecError, KeyValueStorePort, PayloadFilesPort, RcmExecPort, TelemetryPort,
};
use rb_core::rcm;
use rb_infra::{MemoryKeyValueStore, MemoryPayloadFiles, NoopTelemetry};

const ROOT: &str = "/payloads";

struct CountingExec {
    calls: AtomicUsize,
}

#[async_trait]
impl RcmExecPort for CountingExec {
    async fn execute(
        &self,
        _device: DeviceId,
        _bootstrap: &[u8],
        _payload: &[u8],
    ) -> Result<(), ExecError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct Harness {
    files: Arc<MemoryPayloadFiles>,
    exec: Arc<CountingExec>,
    device_tx: mpsc::Sender<DeviceEvent>,
    refresh_tx: mpsc::Sender<PathBuf>,
    handle: RuntimeHandle,
    runtime_task: tokio::task::JoinHandle<()>,
}

async fn start(names: &[&str], selected: Option<&str>, auto_boot: bool) -> Harness {
    let files = Arc::new(MemoryPayloadFiles::new());
    for name in names {
        files.add_file(Path::new(ROOT).join(name), vec![0u8; 2048]);
    }
    let state = Arc::new(MemoryKeyValueStore::new());
    if let Some(selected) = selected {
        state
            .set(keys::SELECTED_PAYLOAD, json!(selected))
            .await
            .unwrap();
    }

    let store = PayloadStore::new(
        PathBuf::from(ROOT),
        None,
        files.clone() as Arc<dyn PayloadFilesPort>,
        state.clone() as Arc<dyn KeyValueStorePort>,
    )
    .await
    .expect("construct store");

    let exec = Arc::new(CountingExec {
        calls: AtomicUsize::new(0),
    });
    let (device_tx, device_rx) = mpsc::channel(16);
    let (refresh_tx, refresh_rx) = mpsc::channel(16);
    let (outcome_tx, outcome_rx) = mpsc::channel(4);
    let boot = BootOrchestrator::new(
        vec![0xA5; 64],
        auto_boot,
        exec.clone() as Arc<dyn RcmExecPort>,
        files.clone() as Arc<dyn PayloadFilesPort>,
        Arc::new(NoopTelemetry) as Arc<dyn TelemetryPort>,
        outcome_tx,
    );

    let (runtime, handle) = Runtime::new(
        store,
        boot,
        state as Arc<dyn KeyValueStorePort>,
        device_rx,
        refresh_rx,
        outcome_rx,
    );
    let runtime_task = tokio::spawn(runtime.run());

    Harness {
        files,
        exec,
        device_tx,
        refresh_tx,
        handle,
        runtime_task,
    }
}

fn device(address: u8) -> RcmDevice {
    RcmDevice {
        id: DeviceId { bus: 1, address },
        vendor_id: rcm::VENDOR_ID,
        product_id: rcm::PRODUCT_ID,
    }
}

async fn wait_for(state_rx: &mut watch::Receiver<AppState>, check: impl Fn(&AppState) -> bool) {
    timeout(Duration::from_secs(2), async {
        loop {
            let done = check(&state_rx.borrow());
            if done {
                return;
            }
            state_rx.changed().await.expect("state channel closed");
        }
    })
    .await
    .expect("condition not reached in time");
}

async fn shutdown(harness: Harness) {
    let _ = harness.handle.commands.send(AppCommand::Shutdown).await;
    timeout(Duration::from_secs(1), harness.runtime_task)
        .await
        .expect("runtime shutdown timeout")
        .expect("runtime task");
}

#[tokio::test]
async fn auto_boot_runs_exactly_one_attempt_end_to_end() {
    let harness = start(&["hekate.bin"], Some("hekate.bin"), true).await;
    let mut state_rx = harness.handle.state.clone();

    harness
        .device_tx
        .send(DeviceEvent::Connected(device(4)))
        .await
        .unwrap();

    wait_for(&mut state_rx, |s| s.attempt == BootAttempt::Succeeded).await;
    assert_eq!(harness.exec.calls.load(Ordering::SeqCst), 1);
    shutdown(harness).await;
}

#[tokio::test]
async fn manual_trigger_boots_through_the_command_channel() {
    let harness = start(&["hekate.bin"], Some("hekate.bin"), false).await;
    let mut state_rx = harness.handle.state.clone();

    harness
        .device_tx
        .send(DeviceEvent::Connected(device(4)))
        .await
        .unwrap();
    wait_for(&mut state_rx, |s| s.connection.is_connected()).await;
    // no auto-boot: connecting alone must not start anything
    assert_eq!(state_rx.borrow().attempt, BootAttempt::NotAttempted);

    let (reply, rx) = oneshot::channel();
    harness
        .handle
        .commands
        .send(AppCommand::TriggerBoot { reply })
        .await
        .unwrap();
    rx.await.unwrap().expect("trigger accepted");

    wait_for(&mut state_rx, |s| s.attempt == BootAttempt::Succeeded).await;
    assert_eq!(harness.exec.calls.load(Ordering::SeqCst), 1);
    shutdown(harness).await;
}

#[tokio::test]
async fn unrelated_disconnect_does_not_change_connection() {
    let harness = start(&["hekate.bin"], None, false).await;
    let mut state_rx = harness.handle.state.clone();

    harness
        .device_tx
        .send(DeviceEvent::Connected(device(4)))
        .await
        .unwrap();
    wait_for(&mut state_rx, |s| s.connection.is_connected()).await;

    harness
        .device_tx
        .send(DeviceEvent::Disconnected(DeviceId { bus: 1, address: 9 }))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(
        state_rx.borrow().connection.is_connected(),
        "unrelated disconnect must not transition"
    );

    harness
        .device_tx
        .send(DeviceEvent::Disconnected(DeviceId { bus: 1, address: 4 }))
        .await
        .unwrap();
    wait_for(&mut state_rx, |s| s.connection == Connection::Idle).await;
    shutdown(harness).await;
}

#[tokio::test]
async fn refresh_signal_picks_up_external_changes() {
    let harness = start(&["a.bin"], None, false).await;
    let mut state_rx = harness.handle.state.clone();

    harness.files.add_file("/payloads/b.bin", vec![0u8; 128]);
    harness
        .refresh_tx
        .send(PathBuf::from(ROOT))
        .await
        .unwrap();

    wait_for(&mut state_rx, |s| s.payloads.len() == 2).await;
    shutdown(harness).await;
}

#[tokio::test]
async fn delete_command_trashes_file_and_clears_selection() {
    let harness = start(&["a.bin", "b.bin"], Some("a.bin"), false).await;
    let mut state_rx = harness.handle.state.clone();

    let (reply, rx) = oneshot::channel();
    harness
        .handle
        .commands
        .send(AppCommand::Delete {
            name: "a.bin".into(),
            reply,
        })
        .await
        .unwrap();
    let trashed = rx.await.unwrap().expect("delete ok");
    assert_eq!(trashed, Some(PathBuf::from("/trash/a.bin")));

    wait_for(&mut state_rx, |s| {
        s.payloads.len() == 1 && s.selected.is_none()
    })
    .await;
    assert!(!harness.files.contains(Path::new("/payloads/a.bin")));
    shutdown(harness).await;
}

#[tokio::test]
async fn import_and_select_commands_round_trip() {
    let harness = start(&[], None, false).await;
    let mut state_rx = harness.handle.state.clone();
    harness.files.add_file("/incoming/new.bin", vec![0u8; 512]);

    let (reply, rx) = oneshot::channel();
    harness
        .handle
        .commands
        .send(AppCommand::Import {
            source: PathBuf::from("/incoming/new.bin"),
            at: None,
            name: None,
            move_file: false,
            reply,
        })
        .await
        .unwrap();
    let payload = rx.await.unwrap().expect("import ok");
    assert_eq!(payload.file_name(), "new.bin");

    let (reply, rx) = oneshot::channel();
    harness
        .handle
        .commands
        .send(AppCommand::Select {
            name: Some("new.bin".into()),
            reply,
        })
        .await
        .unwrap();
    rx.await.unwrap().expect("select ok");

    wait_for(&mut state_rx, |s| s.selected.is_some() && s.payloads.len() == 1).await;
    shutdown(harness).await;
}
