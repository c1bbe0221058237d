//! The watcher service: owns the registration table, the notification
//! backend and the reconciliation thread.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::Receiver;
use dashmap::DashMap;
use parking_lot::Mutex;

use super::handle::NotificationBackend;
use super::kind::{ChangeEvent, EventKind, KindSet};
use super::notify_backend::NotifyBackend;
use super::paths::{closest_existing_ancestor, depth_below, normalize};
use super::reconcile::{self, LoopState, PassStats, RunToggle, SettingsToggle, Switch};
use super::registrar::{SubtreeRegistrar, WalkStats};
use super::registry::{RegistrationInfo, RegistrationTable, Sink};
use super::WatchError;
use crate::config::{Settings, WatchConfig};

/// Maximum number of event kinds accepted by `register`.
const MAX_KINDS: usize = 4;

/// State shared between the service and its reconciliation thread.
pub(crate) struct WatcherCore {
    pub(crate) table: RegistrationTable,
    pub(crate) poll_interval: Duration,
    /// Held for the duration of a pass; passes never interleave.
    pub(crate) pass_lock: Mutex<()>,
    backend: Arc<dyn NotificationBackend>,
    follow_links: bool,
    /// Roots passed to `register`, with their depth.
    roots: DashMap<PathBuf, u32>,
    state: AtomicU8,
    switch: Switch,
    toggle: Option<Arc<dyn RunToggle>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl WatcherCore {
    pub(crate) fn registrar(&self) -> SubtreeRegistrar<'_> {
        SubtreeRegistrar::new(&self.table, self.backend.as_ref(), self.follow_links)
    }

    pub(crate) fn state(&self) -> LoopState {
        LoopState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub(crate) fn mark_halted(&self) {
        self.state.store(LoopState::Halted.as_u8(), Ordering::SeqCst);
    }

    pub(crate) fn should_keep_running(&self) -> bool {
        if !self.switch.is_on() {
            return false;
        }
        let Some(toggle) = &self.toggle else {
            return true;
        };
        match toggle.keep_running() {
            Ok(keep_running) => keep_running,
            Err(e) => {
                tracing::warn!("[reconcile] cannot read run toggle, stopping: {e}");
                false
            }
        }
    }

    /// Whether `path` lies within the depth budget of a root ever passed to
    /// `register`, even if it is no longer in the table.
    fn is_known(&self, path: &Path) -> bool {
        self.roots.iter().any(|root| {
            depth_below(root.key(), path).is_some_and(|depth| depth <= *root.value() as usize)
        })
    }
}

/// Recursive, depth-bounded directory watcher.
///
/// Register a directory with a depth budget and a sink; every change inside
/// the watched subtree is delivered to the sink as `(path, kind)`. New
/// subdirectories are picked up while they are within budget and deleted
/// ones are dropped from the table.
///
/// ```no_run
/// use dirwatch::{DirectoryWatcher, EventKind};
///
/// let watcher = DirectoryWatcher::new()?;
/// watcher.register("/tmp/project", 2, &[EventKind::Create, EventKind::Delete], |path, kind| {
///     println!("{kind} {}", path.display());
/// })?;
/// # Ok::<(), dirwatch::WatchError>(())
/// ```
pub struct DirectoryWatcher {
    core: Arc<WatcherCore>,
}

impl DirectoryWatcher {
    /// Create a watcher with the `notify` backend and default settings.
    pub fn new() -> Result<Self, WatchError> {
        Self::builder().build()
    }

    pub fn builder() -> DirectoryWatcherBuilder {
        DirectoryWatcherBuilder::new()
    }

    /// Register `root` and its subdirectories up to `max_depth` levels.
    ///
    /// Fails fast, before any handle is opened, if `root` is missing or not a
    /// directory, `max_depth` is negative, or `kinds` is empty or has more
    /// than four entries. Starts the reconciliation loop on first success.
    pub fn register<F>(
        &self,
        root: impl AsRef<Path>,
        max_depth: i32,
        kinds: &[EventKind],
        sink: F,
    ) -> Result<WalkStats, WatchError>
    where
        F: Fn(&Path, EventKind) + Send + Sync + 'static,
    {
        let (root, depth, kinds) = validate_registration(root.as_ref(), max_depth, kinds)?;
        let sink: Sink = Arc::new(sink);

        self.core
            .roots
            .entry(root.clone())
            .and_modify(|known| *known = (*known).max(depth))
            .or_insert(depth);

        let stats = self.core.registrar().register_subtree(&root, depth, kinds, &sink);
        crate::log_event!(
            "watcher",
            "registered",
            "{} (depth {depth}, kinds {kinds}): {} new directories, {} already watched, {} files, {} failed",
            root.display(),
            stats.directories_registered,
            stats.directories_already_registered,
            stats.files_seen,
            stats.failed_visits
        );

        self.start_loop()?;
        Ok(stats)
    }

    /// Close and remove every registration at or below `path`.
    ///
    /// Returns how many registrations were removed. Deregistering something
    /// that is no longer registered is a no-op, but a path that is neither a
    /// directory nor inside a registered root is rejected.
    pub fn deregister(&self, path: impl AsRef<Path>) -> Result<usize, WatchError> {
        let path = normalize(path.as_ref())?;

        if !self.core.table.has_subtree(&path) {
            if !path.is_dir() && !self.core.is_known(&path) {
                return Err(WatchError::NotADirectory { path });
            }
            crate::debug_event!("watcher", "nothing to deregister", "{}", path.display());
            return Ok(0);
        }

        let removed = self.core.table.remove_subtree(&path);
        crate::log_event!(
            "watcher",
            "deregistered",
            "{} ({removed} directories)",
            path.display()
        );
        Ok(removed)
    }

    /// Drop buffered records that have not been delivered yet. Handles stay
    /// open. Returns how many records were dropped.
    pub fn clear_pending_events(&self) -> usize {
        let dropped = self.core.table.discard_pending();
        crate::debug_event!("watcher", "cleared pending", "{dropped} records");
        dropped
    }

    /// Run one reconciliation pass on the calling thread.
    ///
    /// Safe while the background loop is running: passes are serialized, so
    /// records from one directory still reach the sink in arrival order.
    /// Must not be called from inside a sink.
    pub fn run_pass(&self) -> PassStats {
        reconcile::run_pass(&self.core)
    }

    /// Stop the reconciliation loop and wait for it to exit.
    ///
    /// The loop is not restarted by later registrations.
    pub fn shutdown(&self) {
        self.core.switch.set(false);
        if self.core.state() == LoopState::Idle {
            self.core.mark_halted();
        }

        let handle = self.core.thread.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                tracing::warn!("[watcher] reconciliation thread panicked");
            }
        }
    }

    pub fn state(&self) -> LoopState {
        self.core.state()
    }

    /// Registered directories, sorted.
    pub fn registered_paths(&self) -> Vec<PathBuf> {
        self.core.table.paths()
    }

    pub fn registration_count(&self) -> usize {
        self.core.table.len()
    }

    pub fn registration(&self, path: impl AsRef<Path>) -> Option<RegistrationInfo> {
        let path = normalize(path.as_ref()).ok()?;
        self.core.table.get(&path).map(|registration| registration.info())
    }

    fn start_loop(&self) -> Result<(), WatchError> {
        let started = self.core.state.compare_exchange(
            LoopState::Idle.as_u8(),
            LoopState::Running.as_u8(),
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        if started.is_err() {
            return Ok(());
        }

        let weak = Arc::downgrade(&self.core);
        let spawned = thread::Builder::new()
            .name("dirwatch-reconcile".to_string())
            .spawn(move || reconcile::run_loop(weak));

        match spawned {
            Ok(handle) => {
                *self.core.thread.lock() = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.core.state.store(LoopState::Idle.as_u8(), Ordering::SeqCst);
                Err(WatchError::LoopStartFailed {
                    reason: e.to_string(),
                })
            }
        }
    }
}

impl Drop for DirectoryWatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Validate `register` arguments, in the order callers see the errors.
fn validate_registration(
    root: &Path,
    max_depth: i32,
    kinds: &[EventKind],
) -> Result<(PathBuf, u32, KindSet), WatchError> {
    let normalized = normalize(root)?;
    if !normalized.exists() {
        return Err(WatchError::PathNotFound {
            nearest_existing: closest_existing_ancestor(&normalized),
            path: normalized,
        });
    }
    if !normalized.is_dir() {
        return Err(WatchError::NotADirectory { path: normalized });
    }
    let depth =
        u32::try_from(max_depth).map_err(|_| WatchError::NegativeDepth { depth: max_depth })?;
    if kinds.is_empty() {
        return Err(WatchError::NoKinds);
    }
    if kinds.len() > MAX_KINDS {
        return Err(WatchError::TooManyKinds { count: kinds.len() });
    }
    Ok((normalized, depth, KindSet::from_kinds(kinds)))
}

/// Builder for constructing a DirectoryWatcher.
pub struct DirectoryWatcherBuilder {
    backend: Option<Arc<dyn NotificationBackend>>,
    toggle: Option<Arc<dyn RunToggle>>,
    poll_interval: Duration,
    follow_links: bool,
}

impl DirectoryWatcherBuilder {
    /// Create a new builder with defaults.
    pub fn new() -> Self {
        let defaults = WatchConfig::default();
        Self {
            backend: None,
            toggle: None,
            poll_interval: Duration::from_millis(defaults.poll_interval_ms),
            follow_links: defaults.follow_links,
        }
    }

    /// Apply the `[watch]` section of the settings.
    pub fn config(mut self, config: &WatchConfig) -> Self {
        self.poll_interval = Duration::from_millis(config.poll_interval_ms);
        self.follow_links = config.follow_links;
        self
    }

    /// Use a custom notification backend instead of `notify`.
    pub fn backend(mut self, backend: impl NotificationBackend + 'static) -> Self {
        self.backend = Some(Arc::new(backend));
        self
    }

    /// Consult `toggle` once per pass; the loop stops when it says so.
    pub fn toggle(mut self, toggle: impl RunToggle + 'static) -> Self {
        self.toggle = Some(Arc::new(toggle));
        self
    }

    /// Delay between reconciliation passes.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Follow symlinks while walking new subtrees.
    pub fn follow_links(mut self, follow: bool) -> Self {
        self.follow_links = follow;
        self
    }

    /// Build the DirectoryWatcher.
    pub fn build(self) -> Result<DirectoryWatcher, WatchError> {
        let backend: Arc<dyn NotificationBackend> = match self.backend {
            Some(backend) => backend,
            None => Arc::new(NotifyBackend::new().map_err(|e| WatchError::InitFailed {
                reason: e.to_string(),
            })?),
        };
        crate::debug_event!("watcher", "backend", "{}", backend.name());

        Ok(DirectoryWatcher {
            core: Arc::new(WatcherCore {
                table: RegistrationTable::new(),
                backend,
                follow_links: self.follow_links,
                poll_interval: self.poll_interval,
                pass_lock: Mutex::new(()),
                roots: DashMap::new(),
                state: AtomicU8::new(LoopState::Idle.as_u8()),
                switch: Switch::on(),
                toggle: self.toggle,
                thread: Mutex::new(None),
            }),
        })
    }
}

impl Default for DirectoryWatcherBuilder {
    fn default() -> Self {
        Self::new()
    }
}

static GLOBAL: OnceLock<DirectoryWatcher> = OnceLock::new();

/// Process-wide watcher, created on first use.
///
/// Settings are loaded from the workspace configuration; when a settings file
/// exists its `watch.enabled` flag is re-read on every pass.
pub fn global() -> Result<&'static DirectoryWatcher, WatchError> {
    if let Some(watcher) = GLOBAL.get() {
        return Ok(watcher);
    }

    let settings = Settings::load().unwrap_or_else(|e| {
        tracing::warn!("[watcher] failed to load settings, using defaults: {e}");
        Settings::default()
    });
    let mut builder = DirectoryWatcher::builder().config(&settings.watch);
    if let Some(config_path) = Settings::find_workspace_config() {
        builder = builder.toggle(SettingsToggle::new(config_path));
    }
    let watcher = builder.build()?;

    // A racing thread may have won; its watcher is kept and ours dropped.
    Ok(GLOBAL.get_or_init(|| watcher))
}

/// A sink that forwards events into a channel.
pub fn channel_sink() -> (
    impl Fn(&Path, EventKind) + Send + Sync + 'static,
    Receiver<ChangeEvent>,
) {
    let (sender, receiver) = crossbeam_channel::unbounded();
    let sink = move |path: &Path, kind: EventKind| {
        let _ = sender.send(ChangeEvent {
            path: path.to_path_buf(),
            kind,
        });
    };
    (sink, receiver)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_validation_order() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("file.txt");
        fs::write(&file, "x").unwrap();
        let all = [EventKind::Create];

        assert!(matches!(
            validate_registration(&temp_dir.path().join("missing"), -1, &[]),
            Err(WatchError::PathNotFound { .. })
        ));
        assert!(matches!(
            validate_registration(&file, -1, &[]),
            Err(WatchError::NotADirectory { .. })
        ));
        assert!(matches!(
            validate_registration(temp_dir.path(), -1, &[]),
            Err(WatchError::NegativeDepth { depth: -1 })
        ));
        assert!(matches!(
            validate_registration(temp_dir.path(), 0, &[]),
            Err(WatchError::NoKinds)
        ));
        assert!(matches!(
            validate_registration(temp_dir.path(), 0, &[EventKind::Create; 5]),
            Err(WatchError::TooManyKinds { count: 5 })
        ));
        assert!(validate_registration(temp_dir.path(), 0, &all).is_ok());
    }

    #[test]
    fn test_missing_path_reports_nearest_existing() {
        let temp_dir = TempDir::new().unwrap();
        let root = normalize(temp_dir.path()).unwrap();

        match validate_registration(&root.join("a/b"), 1, &[EventKind::Create]) {
            Err(WatchError::PathNotFound {
                nearest_existing, ..
            }) => assert_eq!(nearest_existing, Some(root)),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_channel_sink_forwards_events() {
        let (sink, receiver) = channel_sink();
        sink(Path::new("/t/a"), EventKind::Create);

        let event = receiver.try_recv().unwrap();
        assert_eq!(event.path, PathBuf::from("/t/a"));
        assert_eq!(event.kind, EventKind::Create);
    }
}
