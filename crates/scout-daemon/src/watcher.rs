//! Filesystem watcher integration
//!
//! One debounced recursive watcher per monitored folder. The debouncer's
//! callback runs on the notify thread and must never block on lifecycle
//! work: it pushes the folder root onto an unbounded channel and returns.
//! The orchestrator drains that channel and routes each signal to the right
//! lifecycle manager, where event storms coalesce into at most one extra
//! scan pass.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify_debouncer_mini::notify::{self, RecommendedWatcher};
use notify_debouncer_mini::{new_debouncer, DebounceEventResult, Debouncer};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Watch errors
#[derive(Error, Debug)]
pub enum WatchError {
    #[error("failed to watch {path}: {message}")]
    Setup { path: String, message: String },
}

/// Handle keeping one folder's watcher alive; dropping it stops the watch
pub struct FolderWatcher {
    _debouncer: Debouncer<RecommendedWatcher>,
}

/// Start watching a folder subtree for changes.
///
/// All debounced events for the subtree collapse into change-detected
/// signals carrying the folder root; the receiver side looks up the folder's
/// manager by that path.
pub fn watch_folder(
    root: &Path,
    debounce: Duration,
    tx: mpsc::UnboundedSender<PathBuf>,
) -> Result<FolderWatcher, WatchError> {
    let folder = root.to_path_buf();
    let signal_root = folder.clone();

    let mut debouncer = new_debouncer(debounce, move |result: DebounceEventResult| {
        match result {
            Ok(events) => {
                if events.is_empty() {
                    return;
                }
                debug!(
                    "{} debounced event(s) under {:?}",
                    events.len(),
                    signal_root
                );
                // Unbounded send never blocks the notify thread
                let _ = tx.send(signal_root.clone());
            }
            Err(e) => {
                warn!("Watcher error under {:?}: {:?}", signal_root, e);
            }
        }
    })
    .map_err(|e| WatchError::Setup {
        path: folder.display().to_string(),
        message: e.to_string(),
    })?;

    debouncer
        .watcher()
        .watch(&folder, notify::RecursiveMode::Recursive)
        .map_err(|e| WatchError::Setup {
            path: folder.display().to_string(),
            message: e.to_string(),
        })?;

    debug!("Watching {:?}", folder);
    Ok(FolderWatcher {
        _debouncer: debouncer,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[tokio::test]
    async fn test_watch_delivers_change_signal() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let _watcher = watch_folder(dir.path(), Duration::from_millis(50), tx).unwrap();

        fs::write(dir.path().join("new.txt"), "hello").unwrap();

        let got = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no change signal within 5s")
            .expect("channel closed");
        assert_eq!(got, dir.path());
    }

    #[tokio::test]
    async fn test_watch_missing_folder_fails() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let result = watch_folder(
            Path::new("/nonexistent/scout-test"),
            Duration::from_millis(50),
            tx,
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_drop_stops_watching() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let watcher = watch_folder(dir.path(), Duration::from_millis(50), tx).unwrap();
        drop(watcher);

        fs::write(dir.path().join("late.txt"), "too late").unwrap();

        let got = tokio::time::timeout(Duration::from_millis(500), rx.recv()).await;
        // Either the channel is closed or nothing arrives
        assert!(got.is_err() || got.unwrap().is_none());
    }
}
