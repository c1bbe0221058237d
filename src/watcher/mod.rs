//! Recursive directory watcher built from per-directory notification handles.
//!
//! Native notification primitives only watch a single directory. This
//! module keeps one handle per directory of a registered subtree, down to a
//! depth budget, and a background loop keeps that set in step with the tree:
//! new subdirectories get handles, deleted ones lose them.
//!
//! # Architecture
//!
//! ```text
//! DirectoryWatcher
//!   - RegistrationTable (path -> handle, depth budget, kinds, sink)
//!   - SubtreeRegistrar (walkdir, depth-bounded)
//!   - NotificationBackend (notify, one shared native watcher)
//!   - reconciliation thread
//!         |
//!     run_pass: poll -> filter -> register/deregister -> sink
//! ```

mod error;
mod handle;
mod kind;
mod notify_backend;
mod paths;
mod reconcile;
mod registrar;
mod registry;
mod service;

pub use error::{HandleError, WatchError};
pub use handle::{DirectoryHandle, NotificationBackend, RawRecord};
pub use kind::{ChangeEvent, EventKind, KindSet};
pub use notify_backend::NotifyBackend;
pub use paths::{closest_existing_ancestor, is_sub_path, is_within, normalize};
pub use reconcile::{LoopState, PassStats, RunToggle, SettingsToggle, Switch};
pub use registrar::WalkStats;
pub use registry::{RegistrationInfo, Sink};
pub use service::{DirectoryWatcher, DirectoryWatcherBuilder, channel_sink, global};
