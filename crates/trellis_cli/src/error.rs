//! CLI error type.

use std::path::PathBuf;
use thiserror::Error;
use trellis_core::{CoreError, LogVersion};

/// Result type for CLI commands.
pub type CliResult<T> = Result<T, CliError>;

/// Errors reported by CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// The directory holds no log segments.
    #[error("no Trellis database found at {}", .0.display())]
    NoDatabase(PathBuf),

    /// The requested segment does not exist.
    #[error("log segment {0} not found")]
    NoSuchSegment(LogVersion),

    /// A database operation failed.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Storage backend error.
    #[error(transparent)]
    Storage(#[from] trellis_storage::StorageError),

    /// JSON output could not be produced.
    #[error("JSON output failed: {0}")]
    Json(#[from] serde_json::Error),
}
