//! Notification backend built on `notify`.
//!
//! One `notify::RecommendedWatcher` is shared by every handle; each handle
//! adds a non-recursive watch for its own directory and receives the events
//! whose parent is that directory through a private channel. This keeps the
//! number of native watcher instances at one per backend, not one per
//! directory.
//!
//! Native watches are reference counted per directory: a handle opened while
//! an older one for the same directory is still closing takes over the route,
//! and the watch is only removed when the last handle closes.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crossbeam_channel::{Receiver, Sender};
use dashmap::DashMap;
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;

use super::HandleError;
use super::handle::{DirectoryHandle, NotificationBackend, RawRecord};
use super::kind::{EventKind, KindSet};

/// Where records for one directory go.
struct Route {
    id: u64,
    kinds: KindSet,
    sender: Sender<RawRecord>,
    /// Set once the directory's own removal has been forwarded. Shared by
    /// the aliased keys of one handle.
    removed: Arc<AtomicBool>,
}

type Routes = DashMap<PathBuf, Route>;

struct Watches {
    watcher: RecommendedWatcher,
    /// Open handles per watched directory.
    counts: HashMap<PathBuf, usize>,
}

struct Shared {
    watches: Mutex<Watches>,
    routes: Arc<Routes>,
}

impl Shared {
    fn remove_routes(&self, keys: &[PathBuf], id: u64) {
        for key in keys {
            self.routes.remove_if(key, |_, route| route.id == id);
        }
    }
}

/// Production backend using the platform's recommended `notify` watcher.
pub struct NotifyBackend {
    shared: Arc<Shared>,
    next_id: AtomicU64,
}

impl NotifyBackend {
    pub fn new() -> Result<Self, HandleError> {
        let routes: Arc<Routes> = Arc::default();
        let callback_routes = Arc::clone(&routes);

        let watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            dispatch(&callback_routes, res);
        })?;

        Ok(Self {
            shared: Arc::new(Shared {
                watches: Mutex::new(Watches {
                    watcher,
                    counts: HashMap::new(),
                }),
                routes,
            }),
            next_id: AtomicU64::new(0),
        })
    }
}

impl NotificationBackend for NotifyBackend {
    fn name(&self) -> &str {
        "notify"
    }

    fn open(&self, dir: &Path, kinds: KindSet) -> Result<Box<dyn DirectoryHandle>, HandleError> {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        // Some platforms report canonical paths; route those too.
        let mut keys = vec![dir.to_path_buf()];
        if let Ok(canonical) = dir.canonicalize() {
            if canonical != dir {
                keys.push(canonical);
            }
        }

        let mut watches = self.shared.watches.lock();

        // Routes go in before the watch so no early event is lost. A newer
        // handle replaces the route of one that is still closing.
        let removed = Arc::new(AtomicBool::new(false));
        for key in &keys {
            self.shared.routes.insert(
                key.clone(),
                Route {
                    id,
                    kinds,
                    sender: sender.clone(),
                    removed: Arc::clone(&removed),
                },
            );
        }

        if !watches.counts.contains_key(dir) {
            if let Err(e) = watches.watcher.watch(dir, RecursiveMode::NonRecursive) {
                self.shared.remove_routes(&keys, id);
                return Err(e.into());
            }
        }
        *watches.counts.entry(dir.to_path_buf()).or_insert(0) += 1;

        Ok(Box::new(NotifyHandle {
            dir: dir.to_path_buf(),
            keys,
            id,
            receiver,
            shared: Arc::clone(&self.shared),
            closed: false,
        }))
    }
}

struct NotifyHandle {
    dir: PathBuf,
    keys: Vec<PathBuf>,
    id: u64,
    receiver: Receiver<RawRecord>,
    shared: Arc<Shared>,
    closed: bool,
}

impl DirectoryHandle for NotifyHandle {
    fn poll(&mut self) -> Result<Vec<RawRecord>, HandleError> {
        if self.closed {
            return Err(HandleError::Closed);
        }
        Ok(self.receiver.try_iter().collect())
    }

    fn close(&mut self) -> Result<(), HandleError> {
        if self.closed {
            return Err(HandleError::Closed);
        }
        self.closed = true;
        self.shared.remove_routes(&self.keys, self.id);

        let mut watches = self.shared.watches.lock();
        let remaining = match watches.counts.get_mut(&self.dir) {
            Some(count) => {
                *count -= 1;
                *count
            }
            None => 0,
        };
        if remaining > 0 {
            return Ok(());
        }
        watches.counts.remove(&self.dir);

        match watches.watcher.unwatch(&self.dir) {
            Ok(()) => Ok(()),
            // The OS drops the watch itself when the directory is deleted.
            Err(e) if matches!(e.kind, notify::ErrorKind::WatchNotFound) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for NotifyHandle {
    fn drop(&mut self) {
        if !self.closed {
            let _ = self.close();
        }
    }
}

/// Route one notify callback to the per-directory queues.
fn dispatch(routes: &Routes, res: notify::Result<Event>) {
    let event = match res {
        Ok(event) => event,
        Err(e) => {
            // The backend may have dropped events; let the affected
            // directories (or all of them) know.
            tracing::warn!("[notify] watch error: {e}");
            if e.paths.is_empty() {
                broadcast_overflow(routes);
            } else {
                for path in &e.paths {
                    let route = routes
                        .get(path.as_path())
                        .or_else(|| path.parent().and_then(|parent| routes.get(parent)));
                    if let Some(route) = route {
                        let _ = route.sender.send(RawRecord::overflow());
                    }
                }
            }
            return;
        }
    };

    if event.need_rescan() {
        broadcast_overflow(routes);
        return;
    }

    for (path, kind) in translate(&event) {
        let (Some(parent), Some(name)) = (path.parent(), path.file_name()) else {
            continue;
        };
        if kind == EventKind::Delete && !first_removal(routes, &path) {
            continue;
        }
        if let Some(route) = routes.get(parent) {
            if route.kinds.admits(kind) {
                let _ = route.sender.send(RawRecord::new(kind, name));
            }
        } else if kind == EventKind::Delete {
            // A watched directory whose parent is not watched reports its
            // own removal.
            if let Some(route) = routes.get(path.as_path()) {
                if route.kinds.admits(kind) {
                    let _ = route.sender.send(RawRecord::new(kind, PathBuf::new()));
                }
            }
        }
    }
}

/// A watched directory's removal is reported by its parent's watch and by
/// its own. Returns false for the second report.
fn first_removal(routes: &Routes, path: &Path) -> bool {
    match routes.get(path) {
        Some(route) => !route.removed.swap(true, Ordering::SeqCst),
        None => true,
    }
}

fn broadcast_overflow(routes: &Routes) {
    // Aliased keys share a route id; notify each handle once.
    let mut notified = HashSet::new();
    for route in routes.iter() {
        if notified.insert(route.id) {
            let _ = route.sender.send(RawRecord::overflow());
        }
    }
}

/// Map a notify event onto `(path, kind)` pairs.
///
/// A rename with both ends known arrives as `From`, `To` and then `Both`;
/// only the first two are mapped.
fn translate(event: &Event) -> Vec<(PathBuf, EventKind)> {
    use notify::EventKind as Native;

    let all = |kind: EventKind| -> Vec<(PathBuf, EventKind)> {
        event.paths.iter().map(|p| (p.clone(), kind)).collect()
    };

    match event.kind {
        Native::Create(_) => all(EventKind::Create),
        Native::Remove(_) => all(EventKind::Delete),
        Native::Modify(ModifyKind::Name(RenameMode::From)) => all(EventKind::Delete),
        Native::Modify(ModifyKind::Name(RenameMode::To)) => all(EventKind::Create),
        Native::Modify(ModifyKind::Name(RenameMode::Both)) => Vec::new(),
        Native::Modify(ModifyKind::Name(_)) => event
            .paths
            .iter()
            .map(|p| {
                let kind = if p.exists() {
                    EventKind::Create
                } else {
                    EventKind::Delete
                };
                (p.clone(), kind)
            })
            .collect(),
        Native::Modify(_) | Native::Any => all(EventKind::Modify),
        Native::Access(_) | Native::Other => Vec::new(),
    }
}
