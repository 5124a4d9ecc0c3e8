//! Embedding provider seam
//!
//! The indexing step consumes the search engine through this one narrow
//! interface. Scout does not know what an embedding is; it only needs to know
//! whether processing a file succeeded, failed, or hit content that can never
//! succeed until it changes.

use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use scout_core::types::FileOutcome;

/// Why a file could not be processed
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Content is bad; retrying on the same bytes can never succeed
    #[error("corrupted content: {0}")]
    Corrupted(String),

    /// The provider does not handle this format; recorded as skipped
    #[error("unsupported format: {0}")]
    Unsupported(String),

    /// Transient or unknown failure; retried when the content changes
    #[error("processing failed: {0}")]
    Failed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProviderError {
    /// The outcome recorded against the file for this error
    pub fn outcome(&self) -> FileOutcome {
        match self {
            ProviderError::Corrupted(_) => FileOutcome::Corrupted,
            ProviderError::Unsupported(_) => FileOutcome::Skipped,
            ProviderError::Failed(_) | ProviderError::Io(_) => FileOutcome::Failed,
        }
    }
}

/// Anything that can turn a file into index entries
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Process one file with the folder's configured model
    async fn process(&self, path: &Path, model: &str) -> Result<(), ProviderError>;
}

/// Provider that accepts everything without doing work
///
/// Used when the daemon runs without a search backend attached; the full
/// lifecycle (scan, diff, batch, record) still runs end to end.
pub struct NoopProvider;

#[async_trait]
impl EmbeddingProvider for NoopProvider {
    async fn process(&self, path: &Path, model: &str) -> Result<(), ProviderError> {
        debug!("Noop-indexed {:?} with {}", path, model);
        Ok(())
    }
}
