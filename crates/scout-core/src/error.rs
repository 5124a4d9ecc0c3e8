//! Error taxonomy for Scout
//!
//! Four tiers, matching how failures propagate: validation errors go back to
//! the requesting client and are never system faults; per-file errors are
//! recorded against the file and never escalate; folder-level errors move the
//! folder to the `error` state but never crash the daemon; daemon-level
//! recovery is the restart contract, not in-process exception handling.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Machine-readable validation failure kinds (sent over the wire)
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ValidationErrorKind {
    /// Path does not exist on disk
    NotFound,

    /// Path exists but is not a directory
    NotADirectory,

    /// Path is not absolute or fails normalization
    InvalidPath,

    /// Exact path is already configured
    Duplicate,

    /// Path sits inside an already-configured folder
    DescendantOfExisting,

    /// Path contains one or more configured folders (warning: proceeding
    /// replaces the descendants)
    AncestorOfExisting,

    /// Command arrived without its required payload
    MissingPayload,
}

/// Folder-level failures surfaced in `FolderView.error`
#[derive(Error, Debug, Clone)]
pub enum FolderError {
    #[error("folder no longer exists: {0}")]
    Missing(String),

    #[error("scan failed: {0}")]
    Scan(String),

    #[error("state store failure: {0}")]
    Tracker(String),

    #[error("resource admission rejected: {0}")]
    Resources(String),

    #[error("internal task failure: {0}")]
    Internal(String),
}

/// Resource admission rejections (backpressure, not queueing)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    #[error("admission queue full ({depth} waiting)")]
    QueueFull { depth: usize },

    #[error("memory ceiling reached ({current_mb} MB estimated in use)")]
    MemoryExhausted { current_mb: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_kind_wire_names() {
        let json = serde_json::to_string(&ValidationErrorKind::DescendantOfExisting).unwrap();
        assert_eq!(json, "\"descendant_of_existing\"");

        let parsed: ValidationErrorKind =
            serde_json::from_str("\"missing_payload\"").unwrap();
        assert_eq!(parsed, ValidationErrorKind::MissingPayload);
    }

    #[test]
    fn test_folder_error_messages() {
        let err = FolderError::Missing("/data/docs".into());
        assert!(err.to_string().contains("no longer exists"));

        let err = Rejection::QueueFull { depth: 8 };
        assert!(err.to_string().contains("queue full"));
    }
}
