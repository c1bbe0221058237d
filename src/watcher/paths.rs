//! Path helpers shared by the registrar, the table and the loop.
//!
//! All registration keys go through [`normalize`] so that two spellings of
//! the same directory map to one entry.

use std::path::{Component, Path, PathBuf};

use super::WatchError;

/// Make `path` absolute and remove `.` and `..` components lexically.
///
/// Symlinks are not resolved: the registered path is the caller's view of
/// the tree.
pub fn normalize(path: &Path) -> Result<PathBuf, WatchError> {
    let absolute = std::path::absolute(path).map_err(|e| WatchError::InvalidPath {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    Ok(normalized)
}

/// Check whether `candidate` is `parent` or lies below it.
///
/// Fails if `parent` is not a directory on disk.
pub fn is_sub_path(parent: &Path, candidate: &Path) -> Result<bool, WatchError> {
    if !parent.is_dir() {
        return Err(WatchError::NotADirectory {
            path: parent.to_path_buf(),
        });
    }
    let parent = normalize(parent)?;
    let candidate = normalize(candidate)?;
    Ok(is_within(&parent, &candidate))
}

/// Lexical, component-wise containment check on already normalized paths.
///
/// Unlike [`is_sub_path`] this never touches the filesystem, so it works for
/// paths that were just deleted.
pub fn is_within(parent: &Path, candidate: &Path) -> bool {
    candidate.starts_with(parent)
}

/// Number of components `path` sits below `ancestor`, if it is below it.
pub fn depth_below(ancestor: &Path, path: &Path) -> Option<usize> {
    path.strip_prefix(ancestor)
        .ok()
        .map(|relative| relative.components().count())
}

/// Walk up from `path` until an existing entry is found.
///
/// Returns `None` only when not even the filesystem root exists.
pub fn closest_existing_ancestor(path: &Path) -> Option<PathBuf> {
    let absolute = normalize(path).ok()?;
    absolute
        .ancestors()
        .find(|candidate| candidate.exists())
        .map(Path::to_path_buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_normalize_removes_dot_components() {
        let normalized = normalize(Path::new("/a/./b/../c")).unwrap();
        assert_eq!(normalized, PathBuf::from("/a/c"));
    }

    #[test]
    fn test_normalize_relative_is_absolute() {
        let normalized = normalize(Path::new("some/dir")).unwrap();
        assert!(normalized.is_absolute());
        assert!(normalized.ends_with("some/dir"));
    }

    #[test]
    fn test_normalize_empty_path_fails() {
        let result = normalize(Path::new(""));
        assert!(matches!(result, Err(WatchError::InvalidPath { .. })));
    }

    #[test]
    fn test_is_sub_path() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir_all(root.join("a/b")).unwrap();

        assert!(is_sub_path(root, root).unwrap());
        assert!(is_sub_path(root, &root.join("a/b")).unwrap());
        assert!(is_sub_path(root, &root.join("a/missing.txt")).unwrap());
        assert!(!is_sub_path(&root.join("a/b"), &root.join("a")).unwrap());
    }

    #[test]
    fn test_is_sub_path_requires_directory_parent() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("file.txt");
        fs::write(&file, "x").unwrap();

        let result = is_sub_path(&file, temp_dir.path());
        assert!(matches!(result, Err(WatchError::NotADirectory { .. })));
    }

    #[test]
    fn test_is_within_is_component_wise() {
        assert!(is_within(Path::new("/t/a"), Path::new("/t/a/b")));
        assert!(is_within(Path::new("/t/a"), Path::new("/t/a")));
        assert!(!is_within(Path::new("/t/a"), Path::new("/t/ab")));
    }

    #[test]
    fn test_depth_below() {
        assert_eq!(depth_below(Path::new("/t"), Path::new("/t")), Some(0));
        assert_eq!(depth_below(Path::new("/t"), Path::new("/t/a/b")), Some(2));
        assert_eq!(depth_below(Path::new("/t/a"), Path::new("/t/b")), None);
    }

    #[test]
    fn test_closest_existing_ancestor() {
        let temp_dir = TempDir::new().unwrap();
        let root = normalize(temp_dir.path()).unwrap();
        fs::create_dir_all(root.join("a")).unwrap();

        let missing = root.join("a/x/y/z.txt");
        assert_eq!(closest_existing_ancestor(&missing), Some(root.join("a")));
        assert_eq!(closest_existing_ancestor(&root), Some(root.clone()));
    }
}
