//! Boundary to the native per-directory notification primitive.
//!
//! A backend opens one handle per directory. Handles are non-recursive:
//! they only report entries directly inside the directory they were opened
//! for, and they never block when polled.

use std::path::{Path, PathBuf};

use super::HandleError;
use super::kind::{EventKind, KindSet};

/// A raw change record as produced by a handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub kind: EventKind,
    /// Entry name relative to the handle's directory. Empty for records
    /// about the directory itself (overflow, or its own deletion).
    pub name: PathBuf,
}

impl RawRecord {
    pub fn new(kind: EventKind, name: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }

    pub fn overflow() -> Self {
        Self::new(EventKind::Overflow, PathBuf::new())
    }
}

/// Opens notification handles for single directories.
pub trait NotificationBackend: Send + Sync {
    /// Backend name for logging.
    fn name(&self) -> &str;

    /// Open a handle for `dir`, reporting only records admitted by `kinds`.
    fn open(&self, dir: &Path, kinds: KindSet) -> Result<Box<dyn DirectoryHandle>, HandleError>;
}

/// An open, non-recursive notification handle for one directory.
pub trait DirectoryHandle: Send {
    /// Drain every record buffered since the last poll, in arrival order.
    ///
    /// Returns `HandleError::Closed` once the handle has been closed.
    fn poll(&mut self) -> Result<Vec<RawRecord>, HandleError>;

    /// Release the native resources. A second close returns `Closed`.
    fn close(&mut self) -> Result<(), HandleError>;
}
