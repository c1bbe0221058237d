//! Registration table: one entry per watched directory.
//!
//! The table is a lock-striped `DashMap` so the reconciliation loop can take
//! snapshots while other threads register or deregister subtrees. Each entry
//! is the sole owner of its native handle and closes it exactly once, when
//! the entry leaves the table.

use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;

use super::HandleError;
use super::handle::{DirectoryHandle, RawRecord};
use super::kind::{EventKind, KindSet};
use super::paths::is_within;

/// Callback receiving resolved `(path, kind)` notifications.
pub type Sink = Arc<dyn Fn(&Path, EventKind) + Send + Sync>;

/// A watched directory and the state needed to reconcile it.
pub struct Registration {
    path: PathBuf,
    remaining_depth: u32,
    kinds: KindSet,
    sink: Sink,
    handle: Mutex<Box<dyn DirectoryHandle>>,
    /// Records drained from the handle but not yet forwarded.
    pending: Mutex<VecDeque<RawRecord>>,
}

impl Registration {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn remaining_depth(&self) -> u32 {
        self.remaining_depth
    }

    pub fn kinds(&self) -> KindSet {
        self.kinds
    }

    pub fn sink(&self) -> &Sink {
        &self.sink
    }

    pub fn info(&self) -> RegistrationInfo {
        RegistrationInfo {
            path: self.path.clone(),
            remaining_depth: self.remaining_depth,
            kinds: self.kinds,
        }
    }

    /// Poll the handle and queue whatever it returned, preserving order.
    pub(crate) fn poll_into_pending(&self) -> Result<usize, HandleError> {
        let records = self.handle.lock().poll()?;
        let count = records.len();
        self.pending.lock().extend(records);
        Ok(count)
    }

    /// Take the oldest pending record.
    pub(crate) fn next_pending(&self) -> Option<RawRecord> {
        self.pending.lock().pop_front()
    }

    /// Drop queued and natively buffered records. The handle stays open.
    pub(crate) fn discard_pending(&self) -> usize {
        let mut dropped = std::mem::take(&mut *self.pending.lock()).len();
        match self.handle.lock().poll() {
            Ok(records) => dropped += records.len(),
            Err(HandleError::Closed) => {}
            Err(e) => {
                tracing::warn!("[registry] failed to drain {}: {e}", self.path.display());
            }
        }
        dropped
    }

    /// Forward an event to the sink. A panicking sink is logged, not propagated.
    pub(crate) fn deliver(&self, path: &Path, kind: EventKind) {
        let sink = &self.sink;
        if panic::catch_unwind(AssertUnwindSafe(|| sink(path, kind))).is_err() {
            tracing::warn!(
                "[registry] sink panicked on {kind} {} (from {})",
                path.display(),
                self.path.display()
            );
        }
    }

    fn close(&self) -> Result<(), HandleError> {
        self.handle.lock().close()
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("path", &self.path)
            .field("remaining_depth", &self.remaining_depth)
            .field("kinds", &self.kinds)
            .finish_non_exhaustive()
    }
}

/// Read-only view of a registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationInfo {
    pub path: PathBuf,
    pub remaining_depth: u32,
    pub kinds: KindSet,
}

/// Result of trying to add one directory to the table.
#[derive(Debug)]
pub enum InsertOutcome {
    Inserted,
    AlreadyRegistered,
    OpenFailed(HandleError),
}

/// Concurrent map from normalized directory path to its registration.
#[derive(Debug, Default)]
pub struct RegistrationTable {
    entries: DashMap<PathBuf, Arc<Registration>>,
}

impl RegistrationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `path` unless it is already registered.
    ///
    /// `open` runs while the key's shard is held, so concurrent inserts of
    /// the same path never open two handles.
    pub fn insert_with<F>(
        &self,
        path: PathBuf,
        remaining_depth: u32,
        kinds: KindSet,
        sink: &Sink,
        open: F,
    ) -> InsertOutcome
    where
        F: FnOnce(&Path) -> Result<Box<dyn DirectoryHandle>, HandleError>,
    {
        match self.entries.entry(path) {
            Entry::Occupied(_) => InsertOutcome::AlreadyRegistered,
            Entry::Vacant(vacant) => match open(vacant.key()) {
                Ok(handle) => {
                    let registration = Registration {
                        path: vacant.key().clone(),
                        remaining_depth,
                        kinds,
                        sink: Arc::clone(sink),
                        handle: Mutex::new(handle),
                        pending: Mutex::new(VecDeque::new()),
                    };
                    vacant.insert(Arc::new(registration));
                    InsertOutcome::Inserted
                }
                Err(e) => InsertOutcome::OpenFailed(e),
            },
        }
    }

    pub fn get(&self, path: &Path) -> Option<Arc<Registration>> {
        self.entries.get(path).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.entries.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copy of the current registrations, sorted by path.
    pub fn snapshot(&self) -> Vec<Arc<Registration>> {
        let mut registrations: Vec<Arc<Registration>> = self
            .entries
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        registrations.sort_by(|a, b| a.path.cmp(&b.path));
        registrations
    }

    /// Registered paths, sorted.
    pub fn paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.entries.iter().map(|e| e.key().clone()).collect();
        paths.sort();
        paths
    }

    /// Closest registration at or above `path`.
    pub fn nearest_registered_ancestor(&self, path: &Path) -> Option<Arc<Registration>> {
        path.ancestors().find_map(|ancestor| self.get(ancestor))
    }

    /// Whether `path` or anything below it is registered.
    pub fn has_subtree(&self, path: &Path) -> bool {
        self.entries.iter().any(|e| is_within(path, e.key()))
    }

    /// Remove and close every registration at or below `path`.
    ///
    /// Close failures are logged; every matching entry is still removed.
    /// Returns how many entries this call removed.
    pub fn remove_subtree(&self, path: &Path) -> usize {
        self.remove_where(|key| is_within(path, key))
    }

    /// Remove and close every registration.
    pub fn clear(&self) -> usize {
        self.remove_where(|_| true)
    }

    fn remove_where(&self, matches: impl Fn(&Path) -> bool) -> usize {
        let keys: Vec<PathBuf> = self
            .entries
            .iter()
            .filter(|e| matches(e.key()))
            .map(|e| e.key().clone())
            .collect();

        let mut removed = 0;
        for key in keys {
            // Another thread may have removed it since the scan.
            let Entry::Occupied(occupied) = self.entries.entry(key) else {
                continue;
            };
            // Close before the key is released so a concurrent insert of
            // the same path opens its handle only after this one is gone.
            if let Err(e) = occupied.get().close() {
                tracing::warn!(
                    "[registry] failed to close {}: {e}",
                    occupied.key().display()
                );
            }
            let (key, _) = occupied.remove_entry();
            removed += 1;
            crate::debug_event!("registry", "deregistered", "{}", key.display());
        }
        removed
    }

    /// Drop buffered records for every registration.
    pub fn discard_pending(&self) -> usize {
        self.snapshot()
            .iter()
            .map(|registration| registration.discard_pending())
            .sum()
    }
}

impl Drop for RegistrationTable {
    fn drop(&mut self) {
        self.clear();
    }
}
