pub mod cli;
pub mod config;
pub mod logging;
pub mod watcher;

pub use config::Settings;
pub use watcher::{
    ChangeEvent, DirectoryWatcher, DirectoryWatcherBuilder, EventKind, KindSet, LoopState,
    WatchError, channel_sink, global,
};
