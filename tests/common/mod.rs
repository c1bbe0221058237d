//! Shared fixtures for watcher integration tests.
//!
//! `ScriptedBackend` hands out handles whose records are injected by the
//! test, so reconciliation can be driven one pass at a time without relying
//! on native notification timing.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use dirwatch::watcher::{
    DirectoryHandle, EventKind, HandleError, KindSet, NotificationBackend, RawRecord,
};

#[derive(Default)]
struct ScriptState {
    /// Records waiting for the next poll, keyed by directory of open handles.
    queues: HashMap<PathBuf, Vec<RawRecord>>,
    opened: Vec<PathBuf>,
    closed: Vec<PathBuf>,
    /// Close calls on an already closed handle.
    double_closes: usize,
    failing_polls: HashMap<PathBuf, PollFailure>,
    failing_closes: HashSet<PathBuf>,
    close_failures: usize,
}

/// How a handle's poll fails.
#[derive(Clone, Copy)]
pub enum PollFailure {
    /// The handle reports itself closed.
    Closed,
    /// The native primitive returns an error.
    Backend,
}

#[derive(Clone, Default)]
pub struct ScriptedBackend {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a record on the handle for `dir`. Returns false when no handle
    /// is open for `dir`, in which case the record is lost.
    pub fn emit(&self, dir: &Path, kind: EventKind, name: &str) -> bool {
        let mut state = self.state.lock();
        match state.queues.get_mut(dir) {
            Some(queue) => {
                queue.push(RawRecord::new(kind, name));
                true
            }
            None => false,
        }
    }

    pub fn open_count(&self) -> usize {
        self.state.lock().opened.len()
    }

    pub fn close_count(&self) -> usize {
        self.state.lock().closed.len()
    }

    pub fn double_closes(&self) -> usize {
        self.state.lock().double_closes
    }

    pub fn is_open(&self, dir: &Path) -> bool {
        self.state.lock().queues.contains_key(dir)
    }

    /// Make every poll of the handle for `dir` fail.
    pub fn fail_poll(&self, dir: &Path, failure: PollFailure) {
        self.state
            .lock()
            .failing_polls
            .insert(dir.to_path_buf(), failure);
    }

    /// Make closing the handle for `dir` fail. The handle is released anyway.
    pub fn fail_close(&self, dir: &Path) {
        self.state.lock().failing_closes.insert(dir.to_path_buf());
    }

    pub fn close_failures(&self) -> usize {
        self.state.lock().close_failures
    }
}

impl NotificationBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    fn open(&self, dir: &Path, _kinds: KindSet) -> Result<Box<dyn DirectoryHandle>, HandleError> {
        let mut state = self.state.lock();
        state.queues.insert(dir.to_path_buf(), Vec::new());
        state.opened.push(dir.to_path_buf());

        let handle: Box<dyn DirectoryHandle> = Box::new(ScriptedHandle {
            dir: dir.to_path_buf(),
            state: Arc::clone(&self.state),
            closed: false,
        });
        Ok(handle)
    }
}

struct ScriptedHandle {
    dir: PathBuf,
    state: Arc<Mutex<ScriptState>>,
    closed: bool,
}

impl DirectoryHandle for ScriptedHandle {
    fn poll(&mut self) -> Result<Vec<RawRecord>, HandleError> {
        if self.closed {
            return Err(HandleError::Closed);
        }
        let mut state = self.state.lock();
        match state.failing_polls.get(&self.dir) {
            Some(PollFailure::Closed) => return Err(HandleError::Closed),
            Some(PollFailure::Backend) => {
                return Err(HandleError::Backend {
                    reason: "read failed".to_string(),
                });
            }
            None => {}
        }
        Ok(state
            .queues
            .get_mut(&self.dir)
            .map(std::mem::take)
            .unwrap_or_default())
    }

    fn close(&mut self) -> Result<(), HandleError> {
        let mut state = self.state.lock();
        if self.closed {
            state.double_closes += 1;
            return Err(HandleError::Closed);
        }
        self.closed = true;
        state.queues.remove(&self.dir);
        if state.failing_closes.contains(&self.dir) {
            state.close_failures += 1;
            return Err(HandleError::Backend {
                reason: "close failed".to_string(),
            });
        }
        state.closed.push(self.dir.clone());
        Ok(())
    }
}

/// Create `relative` (and its parents) under `root`.
pub fn mkdirs(root: &Path, relative: &str) -> PathBuf {
    let path = root.join(relative);
    fs::create_dir_all(&path).unwrap();
    path
}

/// Every registered path except the roots has a registered parent.
pub fn assert_connected(paths: &[PathBuf], roots: &[&Path]) {
    let registered: HashSet<&Path> = paths.iter().map(PathBuf::as_path).collect();
    for path in paths {
        if roots.contains(&path.as_path()) {
            continue;
        }
        let parent = path.parent().unwrap();
        assert!(
            registered.contains(parent),
            "{} is registered but its parent is not",
            path.display()
        );
    }
}

/// Poll `condition` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}
