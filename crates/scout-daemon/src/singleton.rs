//! PID-file singleton guard
//!
//! Exactly one daemon instance may run against a given configuration
//! directory. The guard writes a PID file on startup and refuses to start
//! when the recorded process is still alive; a stale file left by a crashed
//! daemon is replaced. Dropping the guard removes the file.

use std::path::PathBuf;

use thiserror::Error;
use tracing::{debug, info, warn};

/// Singleton guard errors
#[derive(Error, Debug)]
pub enum SingletonError {
    #[error("another daemon is already running (pid {0})")]
    AlreadyRunning(u32),

    #[error("failed to manage pid file {path}: {message}")]
    Io { path: String, message: String },
}

/// Holds the PID file for the daemon's lifetime
#[derive(Debug)]
pub struct PidLock {
    path: PathBuf,
}

impl PidLock {
    /// Acquire the lock, replacing a stale file from a dead process
    pub fn acquire(path: PathBuf) -> Result<Self, SingletonError> {
        if path.exists() {
            let recorded = std::fs::read_to_string(&path)
                .ok()
                .and_then(|s| s.trim().parse::<u32>().ok());

            match recorded {
                Some(pid) if process_alive(pid) => {
                    return Err(SingletonError::AlreadyRunning(pid));
                }
                Some(pid) => {
                    warn!("Removing stale pid file for dead process {}", pid);
                }
                None => {
                    warn!("Removing unreadable pid file {:?}", path);
                }
            }
            let _ = std::fs::remove_file(&path);
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SingletonError::Io {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
        }

        std::fs::write(&path, std::process::id().to_string()).map_err(|e| SingletonError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        info!("Acquired pid file {:?}", path);
        Ok(Self { path })
    }
}

impl Drop for PidLock {
    fn drop(&mut self) {
        if std::fs::remove_file(&self.path).is_ok() {
            debug!("Released pid file {:?}", self.path);
        }
    }
}

/// Probe whether a process is alive without signalling it
#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    // Values that do not fit a pid_t cannot name a live process, and a
    // negative argument to kill() would signal a process group
    if pid > i32::MAX as u32 {
        return false;
    }
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    // No cheap liveness probe; treat the file as stale
    false
}
