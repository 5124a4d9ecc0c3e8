//! Per-folder lifecycle manager
//!
//! Drives exactly one folder through `pending → scanning → (ready | indexing)
//! → active`, with `active → scanning` on detected changes and any state
//! `→ error` on folder-level failure. The state machine itself enforces the
//! single-writer invariant: a scan/index cycle only starts by winning the
//! transition into `scanning`, so no two cycles for the same folder can ever
//! overlap and no external lock is needed.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use scout_core::error::FolderError;
use scout_core::types::{FileOutcome, FolderConfig, FolderState, FolderView};

use crate::fmdm::FmdmService;
use crate::provider::EmbeddingProvider;
use crate::resources::ResourceManager;
use crate::scanner::{self, ScanEntry};
use crate::tracker::FileStateTracker;

/// Files submitted per admission; bounds peak memory per folder operation
pub const MAX_FILES_PER_BATCH: usize = 50;

/// Memory estimate per in-flight file, in MB
const ESTIMATED_MB_PER_FILE: u64 = 1;

/// Shared collaborators handed to every lifecycle manager
pub struct LifecycleDeps {
    pub tracker: Arc<FileStateTracker>,
    pub resources: Arc<ResourceManager>,
    pub provider: Arc<dyn EmbeddingProvider>,
    pub fmdm: Arc<FmdmService>,
    /// Extra directory names excluded from scans
    pub excludes: Vec<String>,
    pub max_files_per_batch: usize,
}

/// Mutable status slice behind the state machine
#[derive(Clone, Debug)]
struct FolderStatus {
    state: FolderState,
    progress_percent: Option<u8>,
    error: Option<String>,
}

/// State machine for one monitored folder
pub struct FolderLifecycle {
    config: FolderConfig,
    /// Folder path as the stable string key (tracker rows, snapshot views)
    key: String,
    status: RwLock<FolderStatus>,
    /// Change arrived while a cycle was running; run one more pass
    rescan_pending: AtomicBool,
    cancel: CancellationToken,
    deps: Arc<LifecycleDeps>,
    /// Self-handle for spawning the cycle task
    me: Weak<FolderLifecycle>,
}

impl FolderLifecycle {
    pub fn new(config: FolderConfig, deps: Arc<LifecycleDeps>) -> Arc<Self> {
        let key = config.path.display().to_string();
        Arc::new_cyclic(|me| Self {
            config,
            key,
            status: RwLock::new(FolderStatus {
                state: FolderState::Pending,
                progress_percent: None,
                error: None,
            }),
            rescan_pending: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            deps,
            me: me.clone(),
        })
    }

    /// The folder path as a stable string key
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn state(&self) -> FolderState {
        self.status.read().state
    }

    /// Snapshot projection of this folder
    pub fn view(&self) -> FolderView {
        let status = self.status.read();
        FolderView {
            path: self.key.clone(),
            model: self.config.model.clone(),
            state: status.state,
            progress_percent: status.progress_percent,
            error: status.error.clone(),
        }
    }

    /// Begin a scan/index cycle. Idempotent: a no-op while one is running.
    pub fn start(&self) {
        if !self.try_begin_scan() {
            debug!("Scan already in flight for {}, ignoring start", self.key);
            return;
        }
        self.publish();

        if let Some(this) = self.me.upgrade() {
            tokio::spawn(async move {
                this.run_cycle().await;
            });
        }
    }

    /// A filesystem change was detected under this folder.
    ///
    /// Busy states coalesce the request: an event storm produces at most one
    /// extra pass after the current cycle finishes.
    pub fn on_change_detected(&self) {
        if self.status.read().state.is_busy() {
            self.rescan_pending.store(true, Ordering::SeqCst);
            debug!("Change coalesced for {}", self.key);

            // The cycle may have finished between the check and the store;
            // reclaim the flag so the signal is never lost.
            if !self.status.read().state.is_busy()
                && self.rescan_pending.swap(false, Ordering::SeqCst)
            {
                self.start();
            }
        } else {
            self.start();
        }
    }

    /// Cooperatively cancel any in-flight cycle. The running task stops at
    /// the next file-batch boundary; tracker records stay exactly as written.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Move the folder to `error` with an operator-readable message
    /// (e.g. the periodic existence check found the path gone).
    pub fn set_error(&self, message: impl Into<String>) {
        {
            let mut status = self.status.write();
            status.state = FolderState::Error;
            status.error = Some(message.into());
            status.progress_percent = None;
        }
        self.publish();
    }

    /// Re-validation found the folder healthy again: leave `error` by
    /// starting a fresh scan.
    pub fn revalidate(&self) {
        if self.state() == FolderState::Error && self.config.path.is_dir() {
            info!("Folder {} is reachable again, rescanning", self.key);
            self.start();
        }
    }

    /// Win the transition into `scanning`, or lose to a cycle in flight
    fn try_begin_scan(&self) -> bool {
        let mut status = self.status.write();
        if status.state.is_busy() {
            return false;
        }
        status.state = FolderState::Scanning;
        status.error = None;
        status.progress_percent = None;
        true
    }

    fn set_state(&self, state: FolderState) {
        self.status.write().state = state;
    }

    fn set_progress(&self, processed: usize, total: usize) {
        let percent = if total == 0 {
            100
        } else {
            ((processed * 100) / total) as u8
        };
        self.status.write().progress_percent = Some(percent);
    }

    fn publish(&self) {
        // A removed folder must not resurrect its view in the snapshot
        if !self.cancel.is_cancelled() {
            self.deps.fmdm.upsert_folder(self.view());
        }
    }

    async fn run_cycle(self: Arc<Self>) {
        loop {
            match self.scan_and_index().await {
                Ok(true) => {}
                Ok(false) => return, // cancelled mid-cycle
                Err(e) => {
                    warn!("Folder {} failed: {}", self.key, e);
                    self.set_error(e.to_string());
                    return;
                }
            }

            // A change arrived while we were working: exactly one more pass
            if self.rescan_pending.swap(false, Ordering::SeqCst) {
                if !self.try_begin_scan() {
                    return;
                }
                self.publish();
                continue;
            }
            return;
        }
    }

    /// One full scan → diff → index pass. Returns `Ok(false)` when cancelled.
    async fn scan_and_index(&self) -> Result<bool, FolderError> {
        let root = self.config.path.clone();
        if !root.is_dir() {
            return Err(FolderError::Missing(self.key.clone()));
        }

        // Enumerate + hash on the blocking pool; walking is sync I/O
        let excludes = self.deps.excludes.clone();
        let entries = tokio::task::spawn_blocking(move || scanner::scan_folder(&root, &excludes))
            .await
            .map_err(|e| FolderError::Internal(e.to_string()))?
            .map_err(|e| FolderError::Scan(e.to_string()))?;

        if self.cancel.is_cancelled() {
            return Ok(false);
        }

        // The folder may have vanished mid-walk; an empty result from a dead
        // root must not be mistaken for an emptied folder.
        if !self.config.path.is_dir() {
            return Err(FolderError::Missing(self.key.clone()));
        }

        // Reconcile deletions: rows for files no longer on disk are dropped
        // so a reappearance counts as a first sighting.
        let live: HashSet<&str> = entries.iter().map(|e| e.rel.as_str()).collect();
        let known = self
            .deps
            .tracker
            .known_files(&self.key)
            .map_err(|e| FolderError::Tracker(e.to_string()))?;
        for gone in known.iter().filter(|f| !live.contains(f.as_str())) {
            self.deps
                .tracker
                .remove_file(&self.key, gone)
                .map_err(|e| FolderError::Tracker(e.to_string()))?;
        }

        // Diff against recorded state
        let mut pending: Vec<ScanEntry> = Vec::new();
        for entry in entries {
            let decision = self
                .deps
                .tracker
                .decide(&self.key, &entry.rel, &entry.hash)
                .map_err(|e| FolderError::Tracker(e.to_string()))?;
            if decision.process {
                debug!("Will process {} ({})", entry.rel, decision.reason);
                pending.push(entry);
            }
        }

        let report = self.deps.tracker.efficiency_report(&self.key);
        info!(
            "Scan of {} complete: {} to process ({} processed / {} skipped lifetime)",
            self.key,
            pending.len(),
            report.processed,
            report.skipped
        );

        if pending.is_empty() {
            self.set_state(FolderState::Ready);
            self.publish();
            self.set_state(FolderState::Active);
            self.publish();
            return Ok(true);
        }

        self.index_pending(pending).await
    }

    async fn index_pending(&self, pending: Vec<ScanEntry>) -> Result<bool, FolderError> {
        let total = pending.len();
        self.set_state(FolderState::Indexing);
        self.set_progress(0, total);
        self.publish();

        let mut processed = 0usize;
        for batch in pending.chunks(self.deps.max_files_per_batch.max(1)) {
            // Batch boundary: the only cancellation point during indexing
            if self.cancel.is_cancelled() {
                info!(
                    "Indexing of {} cancelled after {}/{} file(s)",
                    self.key, processed, total
                );
                return Ok(false);
            }

            // Folder may vanish mid-run (deleted, unmounted)
            if !self.config.path.is_dir() {
                return Err(FolderError::Missing(self.key.clone()));
            }

            let estimated = batch.len() as u64 * ESTIMATED_MB_PER_FILE;
            let permit = self
                .deps
                .resources
                .admit(&format!("index {}", self.key), estimated)
                .await
                .map_err(|r| FolderError::Resources(r.to_string()))?;

            for entry in batch {
                let result = self
                    .deps
                    .provider
                    .process(&entry.path, &self.config.model)
                    .await;

                // Per-file outcome is durable before the batch completes;
                // per-file failure never aborts the folder.
                match result {
                    Ok(()) => self
                        .deps
                        .tracker
                        .record(&self.key, &entry.rel, &entry.hash, FileOutcome::Indexed, None)
                        .map_err(|e| FolderError::Tracker(e.to_string()))?,
                    Err(e) => {
                        warn!("Processing {} in {} failed: {}", entry.rel, self.key, e);
                        self.deps
                            .tracker
                            .record(
                                &self.key,
                                &entry.rel,
                                &entry.hash,
                                e.outcome(),
                                Some(&e.to_string()),
                            )
                            .map_err(|e| FolderError::Tracker(e.to_string()))?
                    }
                }
                processed += 1;
            }

            drop(permit);
            self.set_progress(processed, total);
            self.publish();
        }

        self.set_state(FolderState::Active);
        self.publish();
        info!("Folder {} active ({} file(s) processed)", self.key, total);
        Ok(true)
    }
}
