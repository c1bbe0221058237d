//! End-to-end tests against the native backend.
//!
//! Native delivery is asynchronous, so every assertion waits with a timeout.

mod common;

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crossbeam_channel::Receiver;
use tempfile::TempDir;

use common::wait_until;
use dirwatch::watcher::{ChangeEvent, DirectoryWatcher, EventKind, channel_sink, normalize};

const TIMEOUT: Duration = Duration::from_secs(10);

fn watcher() -> DirectoryWatcher {
    DirectoryWatcher::builder()
        .poll_interval(Duration::from_millis(10))
        .build()
        .unwrap()
}

/// Receive until an event for `path` of `kind` arrives.
fn expect_event(receiver: &Receiver<ChangeEvent>, path: &Path, kind: EventKind) {
    collect_through(receiver, path, kind);
}

/// Like `expect_event`, then keep listening a little longer and return
/// everything received.
fn collect_through(
    receiver: &Receiver<ChangeEvent>,
    path: &Path,
    kind: EventKind,
) -> Vec<ChangeEvent> {
    let mut seen = Vec::new();
    let found = wait_until(TIMEOUT, || {
        seen.extend(receiver.try_iter());
        seen.iter().any(|e| e.path == path && e.kind == kind)
    });
    assert!(found, "no {kind} for {}; got {seen:?}", path.display());
    std::thread::sleep(Duration::from_millis(300));
    seen.extend(receiver.try_iter());
    seen
}

fn count(seen: &[ChangeEvent], path: &Path, kind: EventKind) -> usize {
    seen.iter().filter(|e| e.path == path && e.kind == kind).count()
}

fn test_root() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let root = normalize(temp_dir.path()).unwrap();
    (temp_dir, root)
}

#[test]
fn test_new_subdirectory_is_tracked() {
    let (_temp, root) = test_root();
    let watcher = watcher();
    let (sink, events) = channel_sink();
    watcher
        .register(&root, 2, &[EventKind::Create, EventKind::Delete], sink)
        .unwrap();

    let sub = root.join("sub");
    fs::create_dir(&sub).unwrap();
    expect_event(&events, &sub, EventKind::Create);
    assert!(wait_until(TIMEOUT, || watcher.registration(&sub).is_some()));

    let file = sub.join("file.txt");
    fs::write(&file, "hello").unwrap();
    expect_event(&events, &file, EventKind::Create);
}

#[test]
fn test_deleted_subdirectory_is_dropped() {
    let (_temp, root) = test_root();
    let sub = root.join("sub");
    fs::create_dir_all(sub.join("inner")).unwrap();

    let watcher = watcher();
    let (sink, events) = channel_sink();
    watcher
        .register(&root, 2, &[EventKind::Create, EventKind::Delete], sink)
        .unwrap();
    assert_eq!(watcher.registration_count(), 3);

    fs::remove_dir_all(&sub).unwrap();
    expect_event(&events, &sub, EventKind::Delete);
    assert!(wait_until(TIMEOUT, || watcher.registered_paths() == vec![root.clone()]));
}

#[test]
fn test_modify_only_registration() {
    let (_temp, root) = test_root();
    let file = root.join("x.txt");
    fs::write(&file, "one").unwrap();

    let watcher = watcher();
    let (sink, events) = channel_sink();
    watcher.register(&root, 1, &[EventKind::Modify], sink).unwrap();

    fs::write(root.join("other.txt"), "new").unwrap();
    fs::write(&file, "two").unwrap();
    expect_event(&events, &file, EventKind::Modify);

    let unexpected: Vec<ChangeEvent> = events
        .try_iter()
        .filter(|e| matches!(e.kind, EventKind::Create | EventKind::Delete))
        .collect();
    assert!(unexpected.is_empty(), "unexpected events: {unexpected:?}");
}

#[test]
fn test_deregister_stops_delivery() {
    let (_temp, root) = test_root();
    let watcher = watcher();
    let (sink, events) = channel_sink();
    watcher.register(&root, 0, &[EventKind::Create], sink).unwrap();

    assert_eq!(watcher.deregister(&root).unwrap(), 1);
    fs::write(root.join("late.txt"), "x").unwrap();

    std::thread::sleep(Duration::from_millis(200));
    assert!(events.try_iter().next().is_none());
}

#[test]
fn test_removed_directory_reported_once() {
    let (_temp, root) = test_root();
    let sub = root.join("sub");
    fs::create_dir(&sub).unwrap();

    let watcher = watcher();
    let (sink, events) = channel_sink();
    watcher
        .register(&root, 2, &[EventKind::Create, EventKind::Delete], sink)
        .unwrap();

    fs::remove_dir(&sub).unwrap();
    let seen = collect_through(&events, &sub, EventKind::Delete);

    assert_eq!(count(&seen, &sub, EventKind::Delete), 1, "got {seen:?}");
    assert!(wait_until(TIMEOUT, || watcher.registered_paths() == vec![root.clone()]));
}

#[test]
fn test_rename_reported_once() {
    let (_temp, root) = test_root();
    let old = root.join("old.txt");
    let new = root.join("new.txt");
    fs::write(&old, "x").unwrap();

    let watcher = watcher();
    let (sink, events) = channel_sink();
    watcher
        .register(&root, 0, &[EventKind::Create, EventKind::Delete], sink)
        .unwrap();

    fs::rename(&old, &new).unwrap();
    let seen = collect_through(&events, &new, EventKind::Create);

    assert_eq!(count(&seen, &old, EventKind::Delete), 1, "got {seen:?}");
    assert_eq!(count(&seen, &new, EventKind::Create), 1, "got {seen:?}");
}
