//! Result store error types.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by the result store.
///
/// Write-side errors are fatal for a scheduling cycle: losing a result
/// silently would corrupt the freshness used for scheduling and weights.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The data directory could not be created.
    #[error("failed to create data directory {}: {source}", path.display())]
    CreateDir { path: PathBuf, source: io::Error },

    /// A result could not be appended to its daily file.
    #[error("failed to write result to {}: {source}", path.display())]
    Write { path: PathBuf, source: io::Error },

    /// A result file could not be read.
    #[error("failed to read results from {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },

    /// A result could not be serialized.
    #[error("failed to encode result for {fingerprint}: {source}")]
    Encode {
        fingerprint: String,
        source: serde_json::Error,
    },

    /// A result file search pattern was rejected.
    #[error("invalid result file pattern {pattern}: {reason}")]
    Pattern { pattern: String, reason: String },
}

impl StoreError {
    /// Returns true for errors that mean results were lost on the write path.
    pub fn is_write_failure(&self) -> bool {
        matches!(
            self,
            StoreError::CreateDir { .. } | StoreError::Write { .. } | StoreError::Encode { .. }
        )
    }
}
