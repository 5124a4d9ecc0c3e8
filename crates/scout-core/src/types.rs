//! Shared value types for the Scout daemon and its clients
//!
//! Everything here is a plain serde value. The snapshot types are immutable
//! by convention: the daemon builds a fresh `Fmdm` on every change and swaps
//! it in wholesale, so none of these carry interior mutability.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a monitored folder
///
/// Normal progression is `pending → scanning → (ready | indexing) → active`,
/// with `active → scanning` on a detected change and any state `→ error` on
/// an unrecoverable folder-level failure.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FolderState {
    /// Configured but not yet scanned
    Pending,
    /// Enumerating files and diffing against known state
    Scanning,
    /// Scan complete, nothing to index
    Ready,
    /// Processing files through the embedding provider
    Indexing,
    /// Fully indexed and watching for changes
    Active,
    /// Folder-level failure; sticky until removed or re-validated
    Error,
}

impl FolderState {
    /// True while a scan/index cycle is in flight for the folder
    pub fn is_busy(self) -> bool {
        matches!(self, FolderState::Scanning | FolderState::Indexing)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FolderState::Pending => "pending",
            FolderState::Scanning => "scanning",
            FolderState::Ready => "ready",
            FolderState::Indexing => "indexing",
            FolderState::Active => "active",
            FolderState::Error => "error",
        }
    }
}

impl std::fmt::Display for FolderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only projection of one folder's state for external consumption
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FolderView {
    /// Absolute, normalized folder path
    pub path: String,

    /// Embedding model configured for this folder
    pub model: String,

    /// Current lifecycle state
    pub state: FolderState,

    /// Indexing progress, 0-100, present only while meaningful
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress_percent: Option<u8>,

    /// Human-readable failure message when `state` is `error`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// What kind of client is on the other end of a sync connection
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ClientKind {
    Tui,
    Cli,
    Other,
}

/// A connected client as seen by the daemon
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClientView {
    /// Server-assigned connection id
    pub id: String,

    /// Client type declared in the handshake
    pub kind: ClientKind,

    /// Unix timestamp of the handshake
    pub connected_at: i64,
}

/// Daemon process metadata
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DaemonInfo {
    pub pid: u32,
    pub uptime_seconds: u64,
}

/// Connection summary carried in the snapshot
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    pub count: usize,
    pub clients: Vec<ClientView>,
}

/// The canonical system-wide snapshot (FMDM)
///
/// Rebuilt wholesale on every relevant change and broadcast in full to every
/// connected client. Clients reconcile by replacing their local copy; no
/// diffs are ever sent.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Fmdm {
    /// Daemon version string
    pub version: String,

    /// One view per configured folder, including errored ones
    pub folders: Vec<FolderView>,

    /// Daemon process metadata
    pub daemon: DaemonInfo,

    /// Currently connected clients
    pub connections: ConnectionInfo,

    /// Embedding models the daemon can assign to folders
    pub available_models: Vec<String>,
}

impl Fmdm {
    /// Look up a folder view by its normalized path
    pub fn folder(&self, path: &str) -> Option<&FolderView> {
        self.folders.iter().find(|f| f.path == path)
    }
}

/// Persisted per-folder configuration
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct FolderConfig {
    /// Absolute, normalized path of the monitored folder
    pub path: PathBuf,

    /// Embedding model used when indexing this folder
    pub model: String,
}

/// Outcome of the last processing attempt for a file
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FileOutcome {
    /// Successfully indexed
    Indexed,
    /// Processing failed; retried only when the content hash changes
    Failed,
    /// Content is bad; never retried while the hash is unchanged
    Corrupted,
    /// Deliberately not processed (e.g. unsupported format)
    Skipped,
}

impl FileOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            FileOutcome::Indexed => "indexed",
            FileOutcome::Failed => "failed",
            FileOutcome::Corrupted => "corrupted",
            FileOutcome::Skipped => "skipped",
        }
    }

    /// Parse the stored string form; unknown values map to `Failed` so a
    /// schema from a newer daemon never panics an older one.
    pub fn parse(s: &str) -> Self {
        match s {
            "indexed" => FileOutcome::Indexed,
            "corrupted" => FileOutcome::Corrupted,
            "skipped" => FileOutcome::Skipped,
            _ => FileOutcome::Failed,
        }
    }
}
