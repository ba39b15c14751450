//! Wires the store, the USB layer, and the control loop together and drives
//! them from CLI commands.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde_json::json;
use tokio::sync::{mpsc, oneshot};
use tracing::info;

use rb_app::{AppCommand, AppState, BootOrchestrator, PayloadStore, Runtime, RuntimeHandle};
use rb_core::boot::BootAttempt;
use rb_core::payload::Payload;
use rb_core::ports::{keys, KeyValueStorePort, PayloadFilesPort, RcmExecPort, TelemetryPort};
use rb_core::rcm;
use rb_infra::{FileKeyValueStore, FsPayloadFiles, LogTelemetry};
use rb_platform::{FolderWatcher, UsbDeviceMonitor, UsbRcmExec};

use crate::cli::{Cli, Command, Switch};

struct Paths {
    payload_root: PathBuf,
    mirror_root: Option<PathBuf>,
    state_file: PathBuf,
    default_intermezzo: PathBuf,
}

impl Paths {
    fn resolve(cli: &Cli) -> Result<Self> {
        let data_dir = dirs::data_dir()
            .context("no per-user data directory on this system")?
            .join("rcmboot");
        Ok(Self {
            payload_root: cli
                .root
                .clone()
                .unwrap_or_else(|| data_dir.join("payloads")),
            mirror_root: cli.mirror_root.clone(),
            state_file: data_dir.join("state.json"),
            default_intermezzo: data_dir.join("intermezzo.bin"),
        })
    }
}

pub async fn run(cli: Cli) -> Result<()> {
    let paths = Paths::resolve(&cli)?;
    match cli.command {
        Command::List { json } => list(&paths, json).await,
        Command::Import {
            file,
            name,
            at,
            move_file,
        } => import(&paths, file, name, at, move_file).await,
        Command::Rename { name, new_name } => rename(&paths, &name, &new_name).await,
        Command::Delete { name } => delete(&paths, &name).await,
        Command::Reorder { from, to } => reorder(&paths, from, to).await,
        Command::Select { name, none } => select(&paths, name, none).await,
        Command::Autoboot { state } => autoboot(&paths, state).await,
        Command::Boot {
            intermezzo,
            payload,
            timeout,
            vendor_id,
            product_id,
        } => {
            boot_once(
                &paths,
                intermezzo,
                payload,
                Duration::from_secs(timeout),
                vendor_id.unwrap_or(rcm::VENDOR_ID),
                product_id.unwrap_or(rcm::PRODUCT_ID),
            )
            .await
        }
        Command::Watch {
            intermezzo,
            vendor_id,
            product_id,
        } => {
            watch(
                &paths,
                intermezzo,
                vendor_id.unwrap_or(rcm::VENDOR_ID),
                product_id.unwrap_or(rcm::PRODUCT_ID),
            )
            .await
        }
    }
}

struct StoreParts {
    files: Arc<dyn PayloadFilesPort>,
    state: Arc<dyn KeyValueStorePort>,
    store: PayloadStore,
}

async fn open_store(paths: &Paths) -> Result<StoreParts> {
    let files: Arc<dyn PayloadFilesPort> = Arc::new(FsPayloadFiles::new());
    let state: Arc<dyn KeyValueStorePort> = Arc::new(FileKeyValueStore::new(&paths.state_file));
    let store = PayloadStore::new(
        paths.payload_root.clone(),
        paths.mirror_root.clone(),
        Arc::clone(&files),
        Arc::clone(&state),
    )
    .await?;
    Ok(StoreParts {
        files,
        state,
        store,
    })
}

async fn load_auto_boot(state: &Arc<dyn KeyValueStorePort>) -> bool {
    match state.get(keys::AUTO_BOOT).await {
        Ok(Some(value)) => value.as_bool().unwrap_or(false),
        _ => false,
    }
}

async fn list(paths: &Paths, as_json: bool) -> Result<()> {
    let parts = open_store(paths).await?;
    let selected = parts.store.selected_payload().map(Payload::file_name);

    if as_json {
        let doc = json!({
            "root": parts.store.effective_root(),
            "payloads": parts.store.payloads(),
            "selected": selected,
        });
        println!("{}", serde_json::to_string_pretty(&doc)?);
        return Ok(());
    }

    if parts.store.payloads().is_empty() {
        println!(
            "no payloads in {}; add one with `rcmboot import`",
            parts.store.effective_root().display()
        );
        return Ok(());
    }
    for payload in parts.store.payloads() {
        let marker = if Some(payload.file_name()) == selected {
            '*'
        } else {
            ' '
        };
        let size = payload
            .size()
            .map(|s| format!("{:.1} KiB", s as f64 / 1024.0))
            .unwrap_or_else(|| "?".into());
        let modified = payload
            .modified()
            .map(|m| m.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();
        println!("{marker} {:<32} {:>12}  {modified}", payload.name(), size);
    }
    Ok(())
}

async fn import(
    paths: &Paths,
    file: PathBuf,
    name: Option<String>,
    at: Option<usize>,
    move_file: bool,
) -> Result<()> {
    let mut parts = open_store(paths).await?;
    let payload = parts
        .store
        .import(&file, at, name.as_deref(), move_file)
        .await?;
    // mirror the selection behavior of a manual import: in manual mode the
    // freshly imported payload becomes the boot selection
    if !load_auto_boot(&parts.state).await {
        let id = payload.id().clone();
        parts.store.select(Some(&id)).await?;
    }
    println!("imported \"{}\"", payload.name());
    Ok(())
}

async fn rename(paths: &Paths, name: &str, new_name: &str) -> Result<()> {
    let mut parts = open_store(paths).await?;
    let id = parts
        .store
        .find_by_name(name)
        .map(|p| p.id().clone())
        .with_context(|| format!("no payload named \"{name}\""))?;
    parts.store.rename(&id, new_name).await?;
    println!("renamed \"{name}\" to \"{new_name}\"");
    Ok(())
}

async fn delete(paths: &Paths, name: &str) -> Result<()> {
    let mut parts = open_store(paths).await?;
    let id = parts
        .store
        .find_by_name(name)
        .map(|p| p.id().clone())
        .with_context(|| format!("no payload named \"{name}\""))?;
    let trashed = parts.store.delete(&id).await?;
    parts.store.remove(&id).await?;
    match trashed {
        Some(location) => println!("moved \"{name}\" to {}", location.display()),
        None => println!("moved \"{name}\" to the trash"),
    }
    Ok(())
}

async fn reorder(paths: &Paths, from: usize, to: usize) -> Result<()> {
    let mut parts = open_store(paths).await?;
    parts.store.reorder(from, to).await?;
    println!("moved payload from position {from} to {to}");
    Ok(())
}

async fn select(paths: &Paths, name: Option<String>, none: bool) -> Result<()> {
    let mut parts = open_store(paths).await?;
    if none {
        parts.store.select(None).await?;
        println!("selection cleared");
        return Ok(());
    }
    let name = name.context("give a payload name, or --none to clear the selection")?;
    let id = parts
        .store
        .find_by_name(&name)
        .map(|p| p.id().clone())
        .with_context(|| format!("no payload named \"{name}\""))?;
    parts.store.select(Some(&id)).await?;
    println!("selected \"{name}\"");
    Ok(())
}

async fn autoboot(paths: &Paths, state: Switch) -> Result<()> {
    let parts = open_store(paths).await?;
    let on = state == Switch::On;
    parts
        .state
        .set(keys::AUTO_BOOT, json!(on))
        .await
        .context("persist auto-boot flag")?;
    println!("auto-boot {}", if on { "on" } else { "off" });
    Ok(())
}

async fn read_bootstrap(paths: &Paths, intermezzo: Option<PathBuf>) -> Result<Vec<u8>> {
    let path = intermezzo.unwrap_or_else(|| paths.default_intermezzo.clone());
    tokio::fs::read(&path).await.with_context(|| {
        format!(
            "bootstrap image not found at {}; supply --intermezzo",
            path.display()
        )
    })
}

struct Pipeline {
    handle: RuntimeHandle,
    runtime_task: tokio::task::JoinHandle<()>,
    _monitor: UsbDeviceMonitor,
    _watchers: Vec<FolderWatcher>,
}

/// Assemble the full pipeline: store, orchestrator, control loop, USB
/// monitor, and (optionally) folder watchers on the payload roots.
async fn start_pipeline(
    paths: &Paths,
    bootstrap: Vec<u8>,
    auto_boot: bool,
    vendor_id: u16,
    product_id: u16,
    watch_folders: bool,
) -> Result<Pipeline> {
    let parts = open_store(paths).await?;

    let (device_tx, device_rx) = mpsc::channel(64);
    let (refresh_tx, refresh_rx) = mpsc::channel(16);
    let (outcome_tx, outcome_rx) = mpsc::channel(4);

    let exec: Arc<dyn RcmExecPort> = Arc::new(UsbRcmExec::new());
    let telemetry: Arc<dyn TelemetryPort> = Arc::new(LogTelemetry);
    let boot = BootOrchestrator::new(
        bootstrap,
        auto_boot,
        exec,
        Arc::clone(&parts.files),
        telemetry,
        outcome_tx,
    );

    let mut watchers = Vec::new();
    if watch_folders {
        watchers.push(FolderWatcher::watch(
            &paths.payload_root,
            refresh_tx.clone(),
        )?);
        if let Some(mirror) = &paths.mirror_root {
            if parts.files.exists(mirror).await {
                watchers.push(FolderWatcher::watch(mirror, refresh_tx.clone())?);
            }
        }
    }

    let (runtime, handle) = Runtime::new(
        parts.store,
        boot,
        Arc::clone(&parts.state),
        device_rx,
        refresh_rx,
        outcome_rx,
    );
    let runtime_task = tokio::spawn(runtime.run());
    let monitor = UsbDeviceMonitor::start(vendor_id, product_id, device_tx)?;

    Ok(Pipeline {
        handle,
        runtime_task,
        _monitor: monitor,
        _watchers: watchers,
    })
}

async fn shutdown(pipeline: Pipeline) {
    let _ = pipeline.handle.commands.send(AppCommand::Shutdown).await;
    let _ = pipeline.runtime_task.await;
}

async fn boot_once(
    paths: &Paths,
    intermezzo: Option<PathBuf>,
    payload: Option<String>,
    timeout: Duration,
    vendor_id: u16,
    product_id: u16,
) -> Result<()> {
    let bootstrap = read_bootstrap(paths, intermezzo).await?;
    let pipeline = start_pipeline(paths, bootstrap, false, vendor_id, product_id, false).await?;
    let result = drive_single_boot(&pipeline.handle, payload, timeout).await;
    shutdown(pipeline).await;
    result
}

async fn drive_single_boot(
    handle: &RuntimeHandle,
    payload: Option<String>,
    timeout: Duration,
) -> Result<()> {
    if let Some(name) = payload {
        let (reply, rx) = oneshot::channel();
        handle
            .commands
            .send(AppCommand::Select {
                name: Some(name),
                reply,
            })
            .await
            .context("control loop gone")?;
        rx.await.context("control loop gone")??;
    }

    let mut state_rx = handle.state.clone();
    if state_rx.borrow().selected.is_none() {
        bail!("no payload selected; run `rcmboot select` first");
    }

    eprintln!("waiting for a device in RCM mode...");
    tokio::time::timeout(timeout, async {
        while !state_rx.borrow().connection.is_connected() {
            state_rx
                .changed()
                .await
                .context("control loop stopped while waiting for a device")?;
        }
        anyhow::Ok(())
    })
    .await
    .context("timed out waiting for a device in RCM mode")??;

    let (reply, rx) = oneshot::channel();
    handle
        .commands
        .send(AppCommand::TriggerBoot { reply })
        .await
        .context("control loop gone")?;
    rx.await.context("control loop gone")??;

    loop {
        state_rx
            .changed()
            .await
            .context("control loop stopped mid-boot")?;
        let attempt = state_rx.borrow().attempt.clone();
        match attempt {
            BootAttempt::Succeeded => {
                println!("payload delivered");
                return Ok(());
            }
            BootAttempt::Failed(reason) => bail!("boot failed: {reason}"),
            BootAttempt::InProgress | BootAttempt::NotAttempted => {}
        }
    }
}

async fn watch(
    paths: &Paths,
    intermezzo: Option<PathBuf>,
    vendor_id: u16,
    product_id: u16,
) -> Result<()> {
    let bootstrap = read_bootstrap(paths, intermezzo).await?;
    let state: Arc<dyn KeyValueStorePort> = Arc::new(FileKeyValueStore::new(&paths.state_file));
    let auto_boot = load_auto_boot(&state).await;

    let pipeline =
        start_pipeline(paths, bootstrap, auto_boot, vendor_id, product_id, true).await?;
    info!(auto_boot, "watching for devices; press ctrl-c to stop");

    let mut state_rx = pipeline.handle.state.clone();
    print_status(&state_rx.borrow());
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = state_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                print_status(&state_rx.borrow());
            }
        }
    }

    shutdown(pipeline).await;
    Ok(())
}

fn print_status(state: &AppState) {
    let selected = state
        .payloads
        .iter()
        .find(|p| Some(p.id()) == state.selected.as_ref())
        .map(|p| p.name())
        .unwrap_or_else(|| "none".into());
    info!(
        connection = %describe_connection(state),
        attempt = %state.attempt,
        selected = %selected,
        "status"
    );
}

fn describe_connection(state: &AppState) -> String {
    match &state.connection {
        rb_core::Connection::Idle => "waiting for device".into(),
        rb_core::Connection::Error(message) => format!("USB error: {message}"),
        rb_core::Connection::Connected(device) => format!("device {device} in RCM mode"),
    }
}
