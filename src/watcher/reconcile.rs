//! Reconciliation loop: drains every handle and keeps the table in step
//! with the live directory tree.
//!
//! Each pass works on a sorted snapshot of the table. Structural changes
//! (registering new subdirectories, deregistering deleted ones) go to the
//! live table, so registrations made during a pass are polled on the next.

use std::path::{Path, PathBuf};
use std::sync::Weak;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use super::handle::RawRecord;
use super::kind::EventKind;
use super::paths::depth_below;
use super::registry::Registration;
use super::service::WatcherCore;
use super::{HandleError, WatchError};
use crate::config::Settings;

/// Lifecycle of the reconciliation loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Never started.
    Idle,
    /// Background thread is polling.
    Running,
    /// Stopped by the run toggle or shutdown. Never restarted.
    Halted,
}

impl LoopState {
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            LoopState::Idle => 0,
            LoopState::Running => 1,
            LoopState::Halted => 2,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => LoopState::Idle,
            1 => LoopState::Running,
            _ => LoopState::Halted,
        }
    }
}

/// External "keep running" signal, read once per pass.
///
/// A read error is treated as a request to stop.
pub trait RunToggle: Send + Sync {
    fn keep_running(&self) -> Result<bool, WatchError>;
}

/// In-process toggle backed by an atomic flag.
#[derive(Debug, Clone)]
pub struct Switch(Arc<AtomicBool>);

impl Switch {
    pub fn on() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn off() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn set(&self, on: bool) {
        self.0.store(on, Ordering::SeqCst);
    }

    pub fn is_on(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

impl Default for Switch {
    fn default() -> Self {
        Self::on()
    }
}

impl RunToggle for Switch {
    fn keep_running(&self) -> Result<bool, WatchError> {
        Ok(self.is_on())
    }
}

/// Toggle that re-reads `watch.enabled` from a settings file every pass.
#[derive(Debug, Clone)]
pub struct SettingsToggle {
    path: PathBuf,
}

impl SettingsToggle {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl RunToggle for SettingsToggle {
    fn keep_running(&self) -> Result<bool, WatchError> {
        Settings::load_from(&self.path)
            .map(|settings| settings.watch.enabled)
            .map_err(|e| WatchError::ConfigError {
                reason: e.to_string(),
            })
    }
}

/// Counters from one reconciliation pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassStats {
    pub handles_polled: usize,
    pub handle_errors: usize,
    pub events_delivered: usize,
    pub registrations_added: usize,
    pub registrations_removed: usize,
}

impl PassStats {
    fn is_quiet(&self) -> bool {
        self.handle_errors == 0
            && self.events_delivered == 0
            && self.registrations_added == 0
            && self.registrations_removed == 0
    }
}

/// Run one pass over a snapshot of the table.
pub(crate) fn run_pass(core: &WatcherCore) -> PassStats {
    let _pass = core.pass_lock.lock();
    let mut stats = PassStats::default();

    for registration in core.table.snapshot() {
        match registration.poll_into_pending() {
            Ok(_) => stats.handles_polled += 1,
            Err(HandleError::Closed) => {
                // Deregistered while this pass was running.
                stats.handle_errors += 1;
                crate::debug_event!(
                    "reconcile",
                    "skipped closed handle",
                    "{}",
                    registration.path().display()
                );
                continue;
            }
            Err(e) => {
                stats.handle_errors += 1;
                tracing::warn!(
                    "[reconcile] poll failed for {}: {e}",
                    registration.path().display()
                );
                continue;
            }
        }

        while let Some(record) = registration.next_pending() {
            if !registration.kinds().admits(record.kind) {
                continue;
            }
            process_record(core, &registration, record, &mut stats);
        }
    }

    stats
}

fn process_record(
    core: &WatcherCore,
    registration: &Registration,
    record: RawRecord,
    stats: &mut PassStats,
) {
    let changed = if record.name.as_os_str().is_empty() {
        registration.path().to_path_buf()
    } else {
        registration.path().join(&record.name)
    };

    match record.kind {
        EventKind::Create => {
            stats.registrations_added += register_created(core, &changed);
            registration.deliver(&changed, record.kind);
        }
        EventKind::Delete => {
            registration.deliver(&changed, record.kind);
            stats.registrations_removed += core.table.remove_subtree(&changed);
        }
        EventKind::Modify | EventKind::Overflow => {
            registration.deliver(&changed, record.kind);
        }
    }
    stats.events_delivered += 1;
}

/// Register a newly created directory if its nearest registered ancestor
/// still has depth budget for it. Returns the number of new registrations.
fn register_created(core: &WatcherCore, created: &Path) -> usize {
    if !created.is_dir() || core.table.contains(created) {
        return 0;
    }
    let Some(ancestor) = core.table.nearest_registered_ancestor(created) else {
        return 0;
    };
    let Some(below) = depth_below(ancestor.path(), created) else {
        return 0;
    };

    let remaining = i64::from(ancestor.remaining_depth()) - below as i64;
    if remaining < 0 {
        crate::debug_event!(
            "reconcile",
            "beyond depth budget",
            "{} (ancestor {} has {})",
            created.display(),
            ancestor.path().display(),
            ancestor.remaining_depth()
        );
        return 0;
    }

    let walk = core.registrar().register_subtree(
        created,
        remaining as u32,
        ancestor.kinds(),
        ancestor.sink(),
    );
    if walk.directories_registered > 0 {
        crate::debug_event!(
            "reconcile",
            "registered new directory",
            "{} ({} directories)",
            created.display(),
            walk.directories_registered
        );
    }
    walk.directories_registered
}

/// Body of the background thread.
///
/// Holds only a weak reference so dropping the service ends the loop.
pub(crate) fn run_loop(core: Weak<WatcherCore>) {
    crate::log_event!("reconcile", "started");

    loop {
        let Some(core) = core.upgrade() else {
            return;
        };

        if !core.should_keep_running() {
            core.mark_halted();
            crate::log_event!("reconcile", "stopped");
            return;
        }

        let stats = run_pass(&core);
        if !stats.is_quiet() {
            crate::debug_event!("reconcile", "pass", "{stats:?}");
        }

        let interval = core.poll_interval;
        drop(core);
        thread::sleep(interval);
    }
}
