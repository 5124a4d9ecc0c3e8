//! Folder orchestrator
//!
//! The only component that mutates the *set* of lifecycle managers. Owns
//! folder validation (shared verbatim between `folder.validate` and
//! `folder.add`, so the two can never drift), the
//! ancestor-replaces-descendants policy, startup restoration from the
//! persisted registry, watcher wiring, and the periodic existence check that
//! turns vanished folders into visible errors instead of silent drops.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use scout_core::config::{ConfigError, DaemonConfig, FolderRegistry};
use scout_core::error::ValidationErrorKind;
use scout_core::messages::{ValidationIssue, ValidationReport};
use scout_core::paths;
use scout_core::types::{FolderConfig, FolderState, FolderView};

use crate::lifecycle::{FolderLifecycle, LifecycleDeps};
use crate::watcher::{watch_folder, FolderWatcher};

/// Orchestrator-level failures
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("validation failed: {}", .0.first_error().unwrap_or("invalid request"))]
    Validation(ValidationReport),

    #[error("folder is not tracked: {0}")]
    NotTracked(String),

    #[error("configuration store error: {0}")]
    Config(#[from] ConfigError),
}

/// One managed folder: its state machine plus its watcher subscription
struct FolderEntry {
    lifecycle: Arc<FolderLifecycle>,
    /// Kept alive for the folder's lifetime; None when the watch could not
    /// be established (the folder still appears in the snapshot, as error)
    _watcher: Option<FolderWatcher>,
}

/// Owns the set of folder lifecycle managers
pub struct FolderOrchestrator {
    managers: DashMap<String, FolderEntry>,
    registry: Arc<FolderRegistry>,
    deps: Arc<LifecycleDeps>,
    default_model: String,
    debounce: Duration,
    existence_interval: Duration,
    change_tx: mpsc::UnboundedSender<PathBuf>,
    change_rx: Mutex<Option<mpsc::UnboundedReceiver<PathBuf>>>,
    shutdown: CancellationToken,
    /// Self-handle for spawning the background loops
    me: Weak<FolderOrchestrator>,
}

impl FolderOrchestrator {
    pub fn new(
        registry: Arc<FolderRegistry>,
        deps: Arc<LifecycleDeps>,
        config: &DaemonConfig,
    ) -> Arc<Self> {
        let (change_tx, change_rx) = mpsc::unbounded_channel();

        Arc::new_cyclic(|me| Self {
            managers: DashMap::new(),
            registry,
            deps,
            default_model: config.index.default_model.clone(),
            debounce: Duration::from_millis(config.watch.debounce_ms),
            existence_interval: Duration::from_secs(config.watch.existence_interval_secs),
            change_tx,
            change_rx: Mutex::new(Some(change_rx)),
            shutdown: CancellationToken::new(),
            me: me.clone(),
        })
    }

    /// Run the folder validation rules, in order, first failure wins.
    ///
    /// Hard errors block the add; the ancestor case is a warning carrying the
    /// folders that would be replaced, so a client can confirm without a
    /// second round-trip.
    pub fn validate(&self, raw_path: &str) -> ValidationReport {
        let mut report = ValidationReport::default();

        let path = match paths::normalize(raw_path) {
            Some(p) => p,
            None => {
                report.errors.push(ValidationIssue::error(
                    ValidationErrorKind::InvalidPath,
                    format!("not a valid absolute path: {}", raw_path),
                ));
                return report;
            }
        };

        if !path.exists() {
            report.errors.push(ValidationIssue::error(
                ValidationErrorKind::NotFound,
                format!("folder does not exist: {}", path.display()),
            ));
            return report;
        }

        if !path.is_dir() {
            report.errors.push(ValidationIssue::error(
                ValidationErrorKind::NotADirectory,
                format!("not a directory: {}", path.display()),
            ));
            return report;
        }

        if self.registry.contains(&path) {
            report.errors.push(ValidationIssue::error(
                ValidationErrorKind::Duplicate,
                format!("folder is already configured: {}", path.display()),
            ));
            return report;
        }

        if let Some(ancestor) = self.registry.ancestor_of(&path) {
            report.errors.push(ValidationIssue::error(
                ValidationErrorKind::DescendantOfExisting,
                format!(
                    "path is inside configured folder {}",
                    ancestor.path.display()
                ),
            ));
            return report;
        }

        let descendants = self.registry.descendants_of(&path);
        if !descendants.is_empty() {
            let affected: Vec<String> = descendants
                .iter()
                .map(|f| f.path.display().to_string())
                .collect();
            report.warnings.push(ValidationIssue::warning_with_folders(
                ValidationErrorKind::AncestorOfExisting,
                format!(
                    "adding this folder replaces {} configured folder(s)",
                    affected.len()
                ),
                affected,
            ));
        }

        report
    }

    /// Add a folder to the monitored set.
    ///
    /// Runs the same rules as [`validate`](Self::validate); on warnings the
    /// add proceeds and configured descendants are torn down first, their
    /// configs removed in the same durable registry write that adds the
    /// ancestor. The returned report carries the warnings that applied.
    pub fn add_folder(
        &self,
        raw_path: &str,
        model: Option<String>,
    ) -> Result<ValidationReport, OrchestratorError> {
        let report = self.validate(raw_path);
        if !report.valid() {
            return Err(OrchestratorError::Validation(report));
        }

        let path = match paths::normalize(raw_path) {
            Some(p) => p,
            // validate() just accepted it; treat a race as not-found
            None => return Err(OrchestratorError::NotTracked(raw_path.to_string())),
        };

        let model = model
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| self.default_model.clone());

        let config = FolderConfig {
            path: path.clone(),
            model,
        };

        let replaced = self.registry.insert_replacing_descendants(config.clone())?;
        for gone in &replaced {
            info!(
                "Replacing descendant folder {} with ancestor {}",
                gone.path.display(),
                path.display()
            );
            self.teardown(&gone.path);
        }

        self.spawn_folder(config);
        info!("Folder added: {}", path.display());
        Ok(report)
    }

    /// Remove a folder from the monitored set, cancelling any in-flight work
    pub fn remove_folder(&self, raw_path: &str) -> Result<(), OrchestratorError> {
        let path = paths::normalize(raw_path)
            .ok_or_else(|| OrchestratorError::NotTracked(raw_path.to_string()))?;

        if !self.registry.remove(&path)? {
            return Err(OrchestratorError::NotTracked(path.display().to_string()));
        }

        self.teardown(&path);
        info!("Folder removed: {}", path.display());
        Ok(())
    }

    /// Reconstruct one manager per persisted folder config.
    ///
    /// Called once at startup. Managers start at `pending`; the file-state
    /// tracker short-circuits re-indexing of unchanged content, which is the
    /// whole crash-recovery contract — a restarted daemon never redoes work
    /// it already recorded.
    pub fn restore_from_config(&self) {
        let folders = self.registry.list();
        if folders.is_empty() {
            return;
        }
        info!("Restoring {} folder(s) from configuration", folders.len());
        for config in folders {
            self.spawn_folder(config);
        }
    }

    /// Spawn the change-dispatch and existence-validation loops
    pub fn run(&self) {
        let mut change_rx = match self.change_rx.lock().take() {
            Some(rx) => rx,
            None => {
                warn!("Orchestrator loops already running");
                return;
            }
        };
        let Some(me) = self.me.upgrade() else { return };

        // Watcher signals → the right manager, by path lookup. The watcher
        // callback already returned; nothing here blocks it.
        let this = me.clone();
        tokio::spawn(async move {
            while let Some(path) = change_rx.recv().await {
                if this.shutdown.is_cancelled() {
                    break;
                }
                let key = path.display().to_string();
                match this.managers.get(&key) {
                    Some(entry) => entry.lifecycle.on_change_detected(),
                    None => debug!("Change signal for unmanaged folder {:?}", path),
                }
            }
        });

        let this = me;
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(this.existence_interval);
            tick.tick().await; // immediate first tick is not a check
            loop {
                tokio::select! {
                    _ = this.shutdown.cancelled() => break,
                    _ = tick.tick() => this.validate_existence(),
                }
            }
        });
    }

    /// Re-stat every configured folder; vanished ones become visible errors
    /// and stay in the snapshot until explicitly removed.
    fn validate_existence(&self) {
        for entry in self.managers.iter() {
            let lifecycle = &entry.value().lifecycle;
            let path = Path::new(lifecycle.key());

            if path.is_dir() {
                // Healthy again after an error: resume with a fresh scan
                lifecycle.revalidate();
            } else if lifecycle.state() != FolderState::Error {
                warn!("Configured folder vanished: {}", lifecycle.key());
                lifecycle.set_error(format!("folder no longer exists: {}", lifecycle.key()));
            }
        }
    }

    /// Views of all managed folders
    pub fn folder_views(&self) -> Vec<FolderView> {
        self.managers
            .iter()
            .map(|e| e.value().lifecycle.view())
            .collect()
    }

    pub fn folder_count(&self) -> usize {
        self.managers.len()
    }

    /// Cancel all in-flight folder work (daemon shutdown)
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        for entry in self.managers.iter() {
            entry.value().lifecycle.stop();
        }
    }

    fn spawn_folder(&self, config: FolderConfig) {
        let lifecycle = FolderLifecycle::new(config.clone(), self.deps.clone());
        let key = lifecycle.key().to_string();

        let watcher = match watch_folder(&config.path, self.debounce, self.change_tx.clone()) {
            Ok(w) => Some(w),
            Err(e) => {
                warn!("{}", e);
                None
            }
        };

        // Publish the pending view before the first transition
        self.deps.fmdm.upsert_folder(lifecycle.view());
        self.managers.insert(
            key,
            FolderEntry {
                lifecycle: lifecycle.clone(),
                _watcher: watcher,
            },
        );

        if config.path.is_dir() {
            lifecycle.start();
        } else {
            lifecycle.set_error(format!("folder no longer exists: {}", lifecycle.key()));
        }
    }

    fn teardown(&self, path: &Path) {
        let key = path.display().to_string();

        if let Some((_, entry)) = self.managers.remove(&key) {
            entry.lifecycle.stop();
        }
        self.deps.fmdm.remove_folder(&key);

        if let Err(e) = self.deps.tracker.purge_folder(&key) {
            warn!("Failed to purge file state for {}: {}", key, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fmdm::FmdmService;
    use crate::provider::{EmbeddingProvider, ProviderError};
    use crate::resources::ResourceManager;
    use crate::tracker::FileStateTracker;
    use async_trait::async_trait;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProvider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingProvider for CountingProvider {
        async fn process(&self, _path: &Path, _model: &str) -> Result<(), ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Fixture {
        orchestrator: Arc<FolderOrchestrator>,
        provider: Arc<CountingProvider>,
        fmdm: Arc<FmdmService>,
        registry: Arc<FolderRegistry>,
        _config_dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        fixture_with_tracker(Arc::new(FileStateTracker::in_memory().unwrap()))
    }

    fn fixture_with_tracker(tracker: Arc<FileStateTracker>) -> Fixture {
        let config_dir = tempfile::tempdir().unwrap();
        let registry =
            Arc::new(FolderRegistry::open(config_dir.path().join("folders.toml")).unwrap());
        let provider = Arc::new(CountingProvider {
            calls: AtomicUsize::new(0),
        });
        let fmdm = Arc::new(FmdmService::new(vec!["nomic-embed-text".into()]));
        let deps = Arc::new(LifecycleDeps {
            tracker,
            resources: Arc::new(ResourceManager::new()),
            provider: provider.clone(),
            fmdm: fmdm.clone(),
            excludes: vec![],
            max_files_per_batch: 50,
        });
        let orchestrator =
            FolderOrchestrator::new(registry.clone(), deps, &DaemonConfig::default());

        Fixture {
            orchestrator,
            provider,
            fmdm,
            registry,
            _config_dir: config_dir,
        }
    }

    async fn wait_for_state(fx: &Fixture, path: &str, wanted: FolderState) {
        for _ in 0..500 {
            let state = fx
                .fmdm
                .current()
                .folder(path)
                .map(|f| f.state);
            if state == Some(wanted) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("folder {} never reached {:?}", path, wanted);
    }

    #[tokio::test]
    async fn test_validate_rules_in_order() {
        let fx = fixture();
        let dir = tempfile::tempdir().unwrap();

        // Nonexistent path
        let report = fx.orchestrator.validate("/nonexistent/scout-target");
        assert!(!report.valid());
        assert_eq!(report.errors[0].kind, ValidationErrorKind::NotFound);

        // A file, not a directory
        let file = dir.path().join("plain.txt");
        fs::write(&file, "x").unwrap();
        let report = fx.orchestrator.validate(file.to_str().unwrap());
        assert_eq!(report.errors[0].kind, ValidationErrorKind::NotADirectory);

        // Relative path
        let report = fx.orchestrator.validate("not/absolute");
        assert_eq!(report.errors[0].kind, ValidationErrorKind::InvalidPath);
    }

    #[tokio::test]
    async fn test_add_reaches_active_and_persists() {
        let fx = fixture();
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.md"), "alpha").unwrap();

        let path = dir.path().to_str().unwrap();
        let report = fx.orchestrator.add_folder(path, None).unwrap();
        assert!(report.valid());
        assert!(report.warnings.is_empty());

        let key = dir.path().display().to_string();
        wait_for_state(&fx, &key, FolderState::Active).await;
        assert!(fx.registry.contains(dir.path()));
        assert_eq!(fx.provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_duplicate_and_descendant_rejected() {
        let fx = fixture();
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("sub");
        fs::create_dir(&sub).unwrap();

        fx.orchestrator
            .add_folder(dir.path().to_str().unwrap(), None)
            .unwrap();

        let report = fx.orchestrator.validate(dir.path().to_str().unwrap());
        assert_eq!(report.errors[0].kind, ValidationErrorKind::Duplicate);

        let report = fx.orchestrator.validate(sub.to_str().unwrap());
        assert_eq!(
            report.errors[0].kind,
            ValidationErrorKind::DescendantOfExisting
        );

        // add applies the exact same rules
        let err = fx
            .orchestrator
            .add_folder(sub.to_str().unwrap(), None)
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Validation(_)));
    }

    #[tokio::test]
    async fn test_ancestor_replaces_descendants() {
        let fx = fixture();
        let dir = tempfile::tempdir().unwrap();
        let sub_a = dir.path().join("a");
        let sub_b = dir.path().join("b");
        fs::create_dir(&sub_a).unwrap();
        fs::create_dir(&sub_b).unwrap();

        fx.orchestrator
            .add_folder(sub_a.to_str().unwrap(), None)
            .unwrap();
        fx.orchestrator
            .add_folder(sub_b.to_str().unwrap(), None)
            .unwrap();

        // Validation warns and names both descendants
        let report = fx.orchestrator.validate(dir.path().to_str().unwrap());
        assert!(report.valid());
        assert_eq!(report.warnings.len(), 1);
        let affected = report.warnings[0].affected_folders.as_ref().unwrap();
        assert_eq!(affected.len(), 2);

        // Adding the ancestor carries the same warning and replaces both
        let add_report = fx
            .orchestrator
            .add_folder(dir.path().to_str().unwrap(), None)
            .unwrap();
        assert_eq!(add_report.warnings, report.warnings);

        assert_eq!(fx.registry.len(), 1);
        assert!(fx.registry.contains(dir.path()));
        assert!(!fx.registry.contains(&sub_a));

        let key = dir.path().display().to_string();
        wait_for_state(&fx, &key, FolderState::Active).await;
        let snap = fx.fmdm.current();
        assert_eq!(snap.folders.len(), 1);
        assert_eq!(snap.folders[0].path, key);
    }

    #[tokio::test]
    async fn test_remove_folder_cleans_up() {
        let fx = fixture();
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.md"), "alpha").unwrap();

        let path = dir.path().to_str().unwrap();
        fx.orchestrator.add_folder(path, None).unwrap();
        let key = dir.path().display().to_string();
        wait_for_state(&fx, &key, FolderState::Active).await;

        fx.orchestrator.remove_folder(path).unwrap();

        assert!(fx.registry.is_empty());
        assert_eq!(fx.orchestrator.folder_count(), 0);
        assert!(fx.fmdm.current().folder(&key).is_none());

        // Removing twice reports not-tracked
        let err = fx.orchestrator.remove_folder(path).unwrap_err();
        assert!(matches!(err, OrchestratorError::NotTracked(_)));
    }

    #[tokio::test]
    async fn test_restore_skips_already_indexed_work() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.md"), "alpha").unwrap();
        fs::write(dir.path().join("b.md"), "beta").unwrap();

        let db_dir = tempfile::tempdir().unwrap();
        let db_path = db_dir.path().join("file-state.db");
        let key = dir.path().display().to_string();

        // First daemon run: index everything, then "crash"
        let registry_path;
        {
            let fx =
                fixture_with_tracker(Arc::new(FileStateTracker::open(&db_path).unwrap()));
            registry_path = fx._config_dir.path().join("folders.toml");
            fx.orchestrator
                .add_folder(dir.path().to_str().unwrap(), None)
                .unwrap();
            wait_for_state(&fx, &key, FolderState::Active).await;
            assert_eq!(fx.provider.calls.load(Ordering::SeqCst), 2);
            fx.orchestrator.shutdown();

            // Restart against the same registry and state database
            let registry = Arc::new(FolderRegistry::open(registry_path.clone()).unwrap());
            let provider = Arc::new(CountingProvider {
                calls: AtomicUsize::new(0),
            });
            let fmdm = Arc::new(FmdmService::new(vec![]));
            let deps = Arc::new(LifecycleDeps {
                tracker: Arc::new(FileStateTracker::open(&db_path).unwrap()),
                resources: Arc::new(ResourceManager::new()),
                provider: provider.clone(),
                fmdm: fmdm.clone(),
                excludes: vec![],
                max_files_per_batch: 50,
            });
            let orchestrator =
                FolderOrchestrator::new(registry, deps, &DaemonConfig::default());
            orchestrator.restore_from_config();

            for _ in 0..500 {
                if fmdm.current().folder(&key).map(|f| f.state)
                    == Some(FolderState::Active)
                {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            assert_eq!(
                fmdm.current().folder(&key).map(|f| f.state),
                Some(FolderState::Active)
            );

            // Zero additional provider invocations: the tracker's history
            // carried across the restart
            assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
        }
    }

    #[tokio::test]
    async fn test_vanished_folder_becomes_visible_error() {
        let fx = fixture();
        let parent = tempfile::tempdir().unwrap();
        let target = parent.path().join("watched");
        fs::create_dir(&target).unwrap();
        fs::write(target.join("a.md"), "alpha").unwrap();

        fx.orchestrator
            .add_folder(target.to_str().unwrap(), None)
            .unwrap();
        let key = target.display().to_string();
        wait_for_state(&fx, &key, FolderState::Active).await;

        fs::remove_dir_all(&target).unwrap();
        fx.orchestrator.validate_existence();

        wait_for_state(&fx, &key, FolderState::Error).await;
        let snap = fx.fmdm.current();
        let folder = snap.folder(&key).unwrap();
        assert!(folder.error.as_ref().unwrap().contains("no longer exists"));

        // Still configured and still visible until someone removes it
        assert!(fx.registry.contains(&target));
        assert_eq!(snap.folders.len(), 1);
    }

    #[tokio::test]
    async fn test_reappeared_folder_leaves_error_state() {
        let fx = fixture();
        let parent = tempfile::tempdir().unwrap();
        let target = parent.path().join("watched");
        fs::create_dir(&target).unwrap();

        fx.orchestrator
            .add_folder(target.to_str().unwrap(), None)
            .unwrap();
        let key = target.display().to_string();
        wait_for_state(&fx, &key, FolderState::Active).await;

        fs::remove_dir_all(&target).unwrap();
        fx.orchestrator.validate_existence();
        wait_for_state(&fx, &key, FolderState::Error).await;

        fs::create_dir(&target).unwrap();
        fx.orchestrator.validate_existence();
        wait_for_state(&fx, &key, FolderState::Active).await;
    }
}
