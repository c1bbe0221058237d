//! Watch command: register a directory and print events until interrupted.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use tokio::sync::mpsc;

use crate::config::Settings;
use crate::watcher::{ChangeEvent, DirectoryWatcher, EventKind, LoopState, SettingsToggle};

/// How often the command checks whether the reconciliation loop halted.
const STATE_CHECK_INTERVAL: Duration = Duration::from_millis(250);

pub struct WatchArgs {
    pub path: PathBuf,
    pub depth: Option<i32>,
    pub kinds: Vec<EventKind>,
    pub json: bool,
    /// Settings file whose `watch.enabled` flag stops the loop.
    pub toggle_file: Option<PathBuf>,
}

/// Format one event for terminal output.
pub fn format_event(event: &ChangeEvent, json: bool) -> anyhow::Result<String> {
    if json {
        return Ok(serde_json::to_string(event)?);
    }
    Ok(format!("{:<8} {}", event.kind, event.path.display()))
}

pub async fn run_watch(args: WatchArgs, settings: &Settings) -> anyhow::Result<()> {
    let depth = args.depth.unwrap_or(settings.watch.default_depth);

    let mut builder = DirectoryWatcher::builder().config(&settings.watch);
    if let Some(toggle_file) = args.toggle_file.as_deref().filter(|p| p.exists()) {
        builder = builder.toggle(SettingsToggle::new(toggle_file));
    }
    let watcher = builder.build().context("Failed to create watcher")?;

    let (sender, mut receiver) = mpsc::unbounded_channel();
    let sink = move |path: &Path, kind: EventKind| {
        let _ = sender.send(ChangeEvent {
            path: path.to_path_buf(),
            kind,
        });
    };

    let stats = watcher
        .register(&args.path, depth, &args.kinds, sink)
        .with_context(|| format!("Failed to watch {}", args.path.display()))?;
    eprintln!(
        "Watching {} ({} directories, depth {depth}). Press Ctrl+C to stop.",
        args.path.display(),
        stats.directories_visited()
    );

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut state_check = tokio::time::interval(STATE_CHECK_INTERVAL);
    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                eprintln!("Stopping...");
                break;
            }
            Some(event) = receiver.recv() => {
                println!("{}", format_event(&event, args.json)?);
            }
            _ = state_check.tick() => {
                if watcher.state() == LoopState::Halted {
                    eprintln!("Watching disabled in settings, stopping.");
                    break;
                }
            }
        }
    }

    tokio::task::spawn_blocking(move || watcher.shutdown())
        .await
        .context("Failed to stop watcher")?;
    Ok(())
}
