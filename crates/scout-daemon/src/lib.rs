//! Scout Daemon - folder lifecycle orchestration and client sync
//!
//! One long-lived process owns the canonical state of every monitored
//! folder, drives each through its indexing pipeline, watches for changes,
//! and publishes a full system snapshot to all connected clients.
//!
//! # Architecture
//!
//! ```text
//! filesystem events ──► watcher ──► orchestrator ──► lifecycle manager
//!                                                        │  (admission via
//!                                                        │   resource manager,
//!                                                        │   decisions via
//!                                                        ▼   file state tracker)
//!                                                  snapshot service (FMDM)
//!                                                        │
//!                                                        ▼
//!                                sync server ──► every connected client
//! ```
//!
//! Commands flow the opposite direction: client → sync server →
//! orchestrator → snapshot service → broadcast to all clients, including
//! the one that issued the command. Responses are acks only; state is
//! observable exclusively through the broadcast, so every client converges
//! through one code path.

pub mod fmdm;
pub mod lifecycle;
pub mod orchestrator;
pub mod provider;
pub mod resources;
pub mod scanner;
pub mod server;
pub mod singleton;
pub mod tracker;
pub mod watcher;

pub use fmdm::FmdmService;
pub use lifecycle::{FolderLifecycle, LifecycleDeps, MAX_FILES_PER_BATCH};
pub use orchestrator::{FolderOrchestrator, OrchestratorError};
pub use provider::{EmbeddingProvider, NoopProvider, ProviderError};
pub use resources::{Permit, ResourceConfig, ResourceLoad, ResourceManager};
pub use scanner::{hash_file, scan_folder, ScanEntry};
pub use server::SyncServer;
pub use singleton::{PidLock, SingletonError};
pub use tracker::{Decision, EfficiencyReport, FileStateTracker, TrackerError};
pub use watcher::{watch_folder, FolderWatcher, WatchError};
