//! Folder watcher against a real filesystem.

use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use rb_platform::FolderWatcher;

#[tokio::test]
async fn burst_of_writes_yields_one_refresh() {
    let dir = tempfile::tempdir().unwrap();
    let (refresh_tx, mut refresh_rx) = mpsc::channel(8);
    let _watcher = FolderWatcher::watch(dir.path(), refresh_tx).unwrap();

    for i in 0..5 {
        tokio::fs::write(dir.path().join(format!("p{i}.bin")), b"data")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let root = timeout(Duration::from_secs(2), refresh_rx.recv())
        .await
        .expect("refresh signal timeout")
        .expect("channel open");
    assert_eq!(root, dir.path().to_path_buf());

    // the whole burst coalesced into that one signal
    let extra = timeout(Duration::from_millis(300), refresh_rx.recv()).await;
    assert!(extra.is_err(), "unexpected second refresh signal");
}

#[tokio::test]
async fn later_changes_signal_again() {
    let dir = tempfile::tempdir().unwrap();
    let (refresh_tx, mut refresh_rx) = mpsc::channel(8);
    let _watcher = FolderWatcher::watch(dir.path(), refresh_tx).unwrap();

    tokio::fs::write(dir.path().join("one.bin"), b"1")
        .await
        .unwrap();
    timeout(Duration::from_secs(2), refresh_rx.recv())
        .await
        .expect("first signal")
        .expect("channel open");

    tokio::fs::remove_file(dir.path().join("one.bin"))
        .await
        .unwrap();
    timeout(Duration::from_secs(2), refresh_rx.recv())
        .await
        .expect("second signal")
        .expect("channel open");
}

#[tokio::test]
async fn watching_a_missing_directory_fails_at_construction() {
    let (refresh_tx, _refresh_rx) = mpsc::channel(8);
    let result = FolderWatcher::watch(&PathBuf::from("/does/not/exist"), refresh_tx);
    assert!(result.is_err());
}

#[tokio::test]
async fn dropping_the_watcher_cancels_pending_signals() {
    let dir = tempfile::tempdir().unwrap();
    let (refresh_tx, mut refresh_rx) = mpsc::channel(8);
    let watcher = FolderWatcher::watch(dir.path(), refresh_tx).unwrap();

    tokio::fs::write(dir.path().join("p.bin"), b"data")
        .await
        .unwrap();
    // drop inside the debounce window; the countdown must not fire afterwards
    tokio::time::sleep(Duration::from_millis(20)).await;
    drop(watcher);

    let signal = timeout(Duration::from_millis(300), refresh_rx.recv()).await;
    assert!(matches!(signal, Ok(None) | Err(_)), "no refresh after drop");
}
