//! SQLite-backed file state tracker
//!
//! One row per file per folder, keyed by `(folder_path, file_path)`, holding
//! the content hash and outcome of the last processing attempt. This table is
//! the basis for skipping unnecessary work: an unchanged file that was
//! already indexed is never reprocessed, and a confirmed failure on unchanged
//! bytes is never retried.
//!
//! Every `record` is a single `INSERT OR REPLACE`, so a crash between two
//! records leaves the table with whole rows only — `decide` never observes a
//! half-written record.

use std::path::Path;
use std::sync::Mutex;

use dashmap::DashMap;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, error, info, warn};

use scout_core::types::FileOutcome;

/// SQLite storage backend
pub struct FileStateTracker {
    conn: Mutex<Connection>,
    /// Per-folder decide() counters since daemon start
    counters: DashMap<String, EfficiencyReport>,
}

/// Whether a file should be processed, and why
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Decision {
    pub process: bool,
    pub reason: &'static str,
}

impl Decision {
    fn process(reason: &'static str) -> Self {
        Self {
            process: true,
            reason,
        }
    }

    fn skip(reason: &'static str) -> Self {
        Self {
            process: false,
            reason,
        }
    }
}

/// Per-folder processed/skipped counts since daemon start
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EfficiencyReport {
    pub processed: u64,
    pub skipped: u64,
}

impl FileStateTracker {
    /// Open or create the file-state database
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, TrackerError> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| TrackerError::Io(e.to_string()))?;
        }
        let conn = Connection::open(path)?;
        let tracker = Self {
            conn: Mutex::new(conn),
            counters: DashMap::new(),
        };
        tracker.init_schema()?;
        Ok(tracker)
    }

    /// Create an in-memory database (for testing)
    pub fn in_memory() -> Result<Self, TrackerError> {
        let conn = Connection::open_in_memory()?;
        let tracker = Self {
            conn: Mutex::new(conn),
            counters: DashMap::new(),
        };
        tracker.init_schema()?;
        Ok(tracker)
    }

    /// Initialize the database schema
    fn init_schema(&self) -> Result<(), TrackerError> {
        let conn = self.conn.lock().map_err(|_| TrackerError::LockPoisoned)?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS file_state (
                folder_path TEXT NOT NULL,
                file_path TEXT NOT NULL,
                content_hash TEXT NOT NULL,
                last_outcome TEXT NOT NULL,
                last_attempt_at INTEGER NOT NULL,
                last_error TEXT,
                PRIMARY KEY (folder_path, file_path)
            );

            CREATE INDEX IF NOT EXISTS idx_file_state_folder ON file_state(folder_path);
            "#,
        )?;

        info!("File state schema initialized");
        Ok(())
    }

    /// Decide whether a file with the given content hash needs processing.
    ///
    /// Policy: process on first sighting or when the hash changed; skip when
    /// the prior outcome was `Indexed` on the same hash; skip (with a
    /// warning) when the prior outcome was `Corrupted` on the same hash —
    /// unchanged bad input is never retried. One recorded failure on
    /// unchanged bytes is terminal until the bytes change.
    pub fn decide(
        &self,
        folder: &str,
        file: &str,
        current_hash: &str,
    ) -> Result<Decision, TrackerError> {
        let prior = {
            let conn = self.conn.lock().map_err(|_| TrackerError::LockPoisoned)?;
            conn.query_row(
                "SELECT content_hash, last_outcome FROM file_state
                 WHERE folder_path = ?1 AND file_path = ?2",
                params![folder, file],
                |row| {
                    let hash: String = row.get(0)?;
                    let outcome: String = row.get(1)?;
                    Ok((hash, outcome))
                },
            )
            .optional()?
        };

        let decision = match prior {
            None => Decision::process("first sighting"),
            Some((hash, _)) if hash != current_hash => Decision::process("content changed"),
            Some((_, outcome)) => match FileOutcome::parse(&outcome) {
                FileOutcome::Indexed => Decision::skip("already indexed, content unchanged"),
                FileOutcome::Corrupted => {
                    warn!(
                        "Skipping corrupted file {} in {} (content unchanged, not retrying)",
                        file, folder
                    );
                    Decision::skip("corrupted content unchanged, not retrying")
                }
                FileOutcome::Failed => Decision::skip("previous failure, content unchanged"),
                FileOutcome::Skipped => Decision::skip("previously skipped, content unchanged"),
            },
        };

        let mut entry = self.counters.entry(folder.to_string()).or_default();
        if decision.process {
            entry.processed += 1;
        } else {
            entry.skipped += 1;
        }

        Ok(decision)
    }

    /// Record the outcome of a processing attempt (single durable write)
    pub fn record(
        &self,
        folder: &str,
        file: &str,
        hash: &str,
        outcome: FileOutcome,
        error_msg: Option<&str>,
    ) -> Result<(), TrackerError> {
        let conn = self.conn.lock().map_err(|_| TrackerError::LockPoisoned)?;
        let now = current_timestamp();

        conn.execute(
            "INSERT OR REPLACE INTO file_state
             (folder_path, file_path, content_hash, last_outcome, last_attempt_at, last_error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![folder, file, hash, outcome.as_str(), now, error_msg],
        )?;

        debug!("Recorded {} for {} in {}", outcome.as_str(), file, folder);
        Ok(())
    }

    /// All file paths known for a folder (for deletion reconciliation)
    pub fn known_files(&self, folder: &str) -> Result<Vec<String>, TrackerError> {
        let conn = self.conn.lock().map_err(|_| TrackerError::LockPoisoned)?;

        let mut stmt =
            conn.prepare("SELECT file_path FROM file_state WHERE folder_path = ?1")?;
        let files: Vec<String> = stmt
            .query_map(params![folder], |row| row.get(0))?
            .filter_map(|r| r.ok())
            .collect();

        Ok(files)
    }

    /// Delete the record for a file that no longer exists on disk, so a
    /// reappearance is indistinguishable from a first sighting.
    pub fn remove_file(&self, folder: &str, file: &str) -> Result<(), TrackerError> {
        let conn = self.conn.lock().map_err(|_| TrackerError::LockPoisoned)?;

        conn.execute(
            "DELETE FROM file_state WHERE folder_path = ?1 AND file_path = ?2",
            params![folder, file],
        )?;

        debug!("Removed state for {} in {}", file, folder);
        Ok(())
    }

    /// Delete every record for a folder (called when the folder is removed)
    pub fn purge_folder(&self, folder: &str) -> Result<usize, TrackerError> {
        let conn = self.conn.lock().map_err(|_| TrackerError::LockPoisoned)?;

        let count = conn.execute(
            "DELETE FROM file_state WHERE folder_path = ?1",
            params![folder],
        )?;

        self.counters.remove(folder);

        if count > 0 {
            info!("Purged {} file record(s) for {}", count, folder);
        }
        Ok(count)
    }

    /// Number of records for a folder
    pub fn file_count(&self, folder: &str) -> Result<usize, TrackerError> {
        let conn = self.conn.lock().map_err(|_| TrackerError::LockPoisoned)?;

        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM file_state WHERE folder_path = ?1",
            params![folder],
            |row| row.get(0),
        )?;

        Ok(count as usize)
    }

    /// Processed/skipped decision counts for a folder since daemon start
    pub fn efficiency_report(&self, folder: &str) -> EfficiencyReport {
        self.counters
            .get(folder)
            .map(|r| *r.value())
            .unwrap_or_default()
    }
}

/// Get current Unix timestamp
fn current_timestamp() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Tracker errors
#[derive(Debug)]
pub enum TrackerError {
    Database(rusqlite::Error),
    Io(String),
    /// Mutex lock was poisoned (indicates a panic occurred while holding the lock)
    LockPoisoned,
}

impl From<rusqlite::Error> for TrackerError {
    fn from(e: rusqlite::Error) -> Self {
        error!("Database error: {:?}", e);
        TrackerError::Database(e)
    }
}

impl std::fmt::Display for TrackerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackerError::Database(e) => write!(f, "Database error: {}", e),
            TrackerError::Io(e) => write!(f, "I/O error: {}", e),
            TrackerError::LockPoisoned => {
                write!(f, "Lock poisoned: a thread panicked while holding the lock")
            }
        }
    }
}

impl std::error::Error for TrackerError {}
