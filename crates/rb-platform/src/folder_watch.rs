//! Debounced folder watching.
//!
//! Raw filesystem events arrive in bursts (a copy into the payload folder can
//! raise dozens). Each watcher coalesces them: every raw event restarts a
//! single countdown, and only a full quiet period produces one refresh signal.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

/// Quiet period before a refresh signal fires.
pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(100);

#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("failed to watch {path}: {source}")]
    Install {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
}

/// Watches one directory for writes and deletions.
///
/// Must be created on a tokio runtime. Dropping the watcher deregisters the
/// filesystem watch and cancels any pending countdown, so no signal fires
/// after the watcher is gone.
pub struct FolderWatcher {
    _watcher: RecommendedWatcher,
    debounce: JoinHandle<()>,
}

impl FolderWatcher {
    /// Watch `path`, sending one signal per quiet period to `refresh_tx`.
    /// The signal carries the watched path so one channel can serve several
    /// watchers. Failing to install the watch is a construction error.
    pub fn watch(path: &Path, refresh_tx: mpsc::Sender<PathBuf>) -> Result<Self, WatchError> {
        Self::watch_with_window(path, DEBOUNCE_WINDOW, refresh_tx)
    }

    pub fn watch_with_window(
        path: &Path,
        window: Duration,
        refresh_tx: mpsc::Sender<PathBuf>,
    ) -> Result<Self, WatchError> {
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let install = |source| WatchError::Install {
            path: path.to_path_buf(),
            source,
        };

        let mut watcher =
            notify::recommended_watcher(move |result: Result<Event, notify::Error>| {
                match result {
                    // only content changes matter; access notifications are noise
                    Ok(event) if is_relevant(&event.kind) => {
                        let _ = raw_tx.send(());
                    }
                    Ok(_) => {}
                    Err(error) => warn!(%error, "folder watch error"),
                }
            })
            .map_err(install)?;
        watcher
            .watch(path, RecursiveMode::NonRecursive)
            .map_err(install)?;

        let debounce = tokio::spawn(debounce(raw_rx, window, refresh_tx, path.to_path_buf()));
        Ok(Self {
            _watcher: watcher,
            debounce,
        })
    }
}

impl Drop for FolderWatcher {
    fn drop(&mut self) {
        self.debounce.abort();
    }
}

fn is_relevant(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

/// Last-event-wins countdown: each raw event discards the previous countdown
/// and starts a new one; only an uninterrupted window emits a signal.
async fn debounce(
    mut raw_rx: mpsc::UnboundedReceiver<()>,
    window: Duration,
    refresh_tx: mpsc::Sender<PathBuf>,
    root: PathBuf,
) {
    while raw_rx.recv().await.is_some() {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(window) => {
                    if refresh_tx.send(root.clone()).await.is_err() {
                        return;
                    }
                    break;
                }
                more = raw_rx.recv() => {
                    if more.is_none() {
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    #[tokio::test(start_paused = true)]
    async fn burst_collapses_into_one_signal() {
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let (refresh_tx, mut refresh_rx) = mpsc::channel(4);
        let task = tokio::spawn(debounce(
            raw_rx,
            Duration::from_millis(100),
            refresh_tx,
            PathBuf::from("/payloads"),
        ));

        for _ in 0..5 {
            raw_tx.send(()).unwrap();
            advance(Duration::from_millis(10)).await;
        }
        assert!(refresh_rx.try_recv().is_err(), "no signal inside the window");

        advance(Duration::from_millis(100)).await;
        assert_eq!(refresh_rx.recv().await, Some(PathBuf::from("/payloads")));
        assert!(refresh_rx.try_recv().is_err(), "exactly one signal per burst");

        drop(raw_tx);
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn separate_bursts_signal_separately() {
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let (refresh_tx, mut refresh_rx) = mpsc::channel(4);
        let task = tokio::spawn(debounce(
            raw_rx,
            Duration::from_millis(100),
            refresh_tx,
            PathBuf::from("/payloads"),
        ));

        raw_tx.send(()).unwrap();
        advance(Duration::from_millis(150)).await;
        assert!(refresh_rx.recv().await.is_some());

        raw_tx.send(()).unwrap();
        advance(Duration::from_millis(150)).await;
        assert!(refresh_rx.recv().await.is_some());

        drop(raw_tx);
        task.await.unwrap();
    }
}
