//! Depth-bounded registration of a directory subtree.

use std::path::Path;

use walkdir::WalkDir;

use super::handle::NotificationBackend;
use super::kind::KindSet;
use super::registry::{InsertOutcome, RegistrationTable, Sink};

/// Counters from one registration walk.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WalkStats {
    pub directories_registered: usize,
    pub directories_already_registered: usize,
    pub files_seen: usize,
    pub failed_visits: usize,
}

impl WalkStats {
    pub fn directories_visited(&self) -> usize {
        self.directories_registered + self.directories_already_registered
    }
}

/// Walks a root down to its depth budget and registers every directory.
pub struct SubtreeRegistrar<'a> {
    table: &'a RegistrationTable,
    backend: &'a dyn NotificationBackend,
    follow_links: bool,
}

impl<'a> SubtreeRegistrar<'a> {
    pub fn new(
        table: &'a RegistrationTable,
        backend: &'a dyn NotificationBackend,
        follow_links: bool,
    ) -> Self {
        Self {
            table,
            backend,
            follow_links,
        }
    }

    /// Register `root` and its subdirectories up to `max_depth` levels below.
    ///
    /// `root` must already be normalized. A directory at depth `d` gets a
    /// remaining budget of `max_depth - d`. Directories that are already
    /// registered keep their existing entry. If a handle cannot be opened the
    /// directory's subtree is skipped and the walk continues with siblings.
    pub fn register_subtree(
        &self,
        root: &Path,
        max_depth: u32,
        kinds: KindSet,
        sink: &Sink,
    ) -> WalkStats {
        let mut stats = WalkStats::default();
        let mut walker = WalkDir::new(root)
            .follow_links(self.follow_links)
            .max_depth(max_depth as usize)
            .into_iter();

        while let Some(entry) = walker.next() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    stats.failed_visits += 1;
                    crate::debug_event!("registrar", "visit failed", "{e}");
                    continue;
                }
            };

            if !entry.file_type().is_dir() {
                stats.files_seen += 1;
                continue;
            }

            let remaining_depth = max_depth.saturating_sub(entry.depth() as u32);
            let backend = self.backend;
            let outcome = self.table.insert_with(
                entry.path().to_path_buf(),
                remaining_depth,
                kinds,
                sink,
                |dir| backend.open(dir, kinds),
            );

            match outcome {
                InsertOutcome::Inserted => {
                    stats.directories_registered += 1;
                    crate::debug_event!(
                        "registrar",
                        "registered",
                        "{} (depth budget {remaining_depth})",
                        entry.path().display()
                    );
                }
                InsertOutcome::AlreadyRegistered => {
                    stats.directories_already_registered += 1;
                }
                InsertOutcome::OpenFailed(e) => {
                    stats.failed_visits += 1;
                    tracing::warn!(
                        "[registrar] cannot watch {}: {e}",
                        entry.path().display()
                    );
                    walker.skip_current_dir();
                }
            }
        }

        stats
    }
}
