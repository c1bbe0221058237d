//! Error types for the directory watcher.

use std::path::PathBuf;
use thiserror::Error;

/// Errors returned to callers of the watcher.
///
/// Only caller-usage and setup problems surface here; per-handle failures
/// inside the reconciliation loop are logged and absorbed.
#[derive(Error, Debug)]
pub enum WatchError {
    #[error("Path does not exist: {}", path.display())]
    PathNotFound {
        path: PathBuf,
        nearest_existing: Option<PathBuf>,
    },

    #[error("Path is not a directory: {}", path.display())]
    NotADirectory { path: PathBuf },

    #[error("Max depth must not be negative, got {depth}")]
    NegativeDepth { depth: i32 },

    #[error("At least one event kind must be watched")]
    NoKinds,

    #[error("At most 4 event kinds can be watched, got {count}")]
    TooManyKinds { count: usize },

    #[error("Invalid path {}: {reason}", path.display())]
    InvalidPath { path: PathBuf, reason: String },

    #[error("Failed to initialize watcher: {reason}")]
    InitFailed { reason: String },

    #[error("Failed to start reconciliation loop: {reason}")]
    LoopStartFailed { reason: String },

    #[error("Failed to load config: {reason}")]
    ConfigError { reason: String },
}

/// Errors from a single native notification handle.
#[derive(Error, Debug)]
pub enum HandleError {
    #[error("Notification handle is closed")]
    Closed,

    #[error("Notification backend error: {reason}")]
    Backend { reason: String },
}

impl From<notify::Error> for HandleError {
    fn from(e: notify::Error) -> Self {
        HandleError::Backend {
            reason: e.to_string(),
        }
    }
}
