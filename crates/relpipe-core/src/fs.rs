//! Idempotent filesystem removal.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use tracing::debug;

use crate::error::{ReleaseError, Result};

/// Ensure nothing matching `patterns` exists under `root`.
///
/// Each pattern is relative to `root` and may be a glob (`.pex-build*`).
/// Files are unlinked, directories removed recursively, symlinks removed
/// without following them. A target that is already absent is not an
/// error, so calling this twice in a row is always safe.
///
/// Returns the paths that were actually removed, sorted.
pub fn ensure_absent<S: AsRef<str>>(root: &Path, patterns: &[S]) -> Result<Vec<PathBuf>> {
    let mut removed = Vec::new();

    for pattern in patterns {
        let pattern = pattern.as_ref();
        check_pattern(pattern)?;

        if is_glob(pattern) {
            let full = format!(
                "{}/{}",
                glob::Pattern::escape(&root.to_string_lossy()),
                pattern
            );
            let entries = glob::glob(&full).map_err(|e| {
                ReleaseError::InvalidConfig(format!("bad removal pattern {pattern:?}: {e}"))
            })?;
            for entry in entries {
                // An unreadable directory may hide matches; never report it clean.
                let entry = entry
                    .map_err(|e| std::io::Error::new(e.error().kind(), e.to_string()))?;
                if remove_path(&entry)? {
                    removed.push(entry);
                }
            }
        } else {
            let path = root.join(pattern);
            if remove_path(&path)? {
                removed.push(path);
            }
        }
    }

    removed.sort();
    removed.dedup();
    Ok(removed)
}

/// Remove a single path. Returns whether anything was removed.
fn remove_path(path: &Path) -> Result<bool> {
    let metadata = match std::fs::symlink_metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e.into()),
    };

    let outcome = if metadata.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    };

    match outcome {
        Ok(()) => {
            debug!(path = %path.display(), "Removed");
            Ok(true)
        }
        // Raced with another remover; the target is gone either way.
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

fn is_glob(pattern: &str) -> bool {
    pattern.contains(['*', '?', '['])
}

fn check_pattern(pattern: &str) -> Result<()> {
    let escapes = Path::new(pattern)
        .components()
        .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)));
    let is_root = Path::new(pattern)
        .components()
        .all(|c| matches!(c, Component::CurDir));
    if pattern.trim().is_empty() || escapes || is_root {
        return Err(ReleaseError::InvalidConfig(format!(
            "removal target {pattern:?} must be a relative path inside the working tree"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_targets_are_not_errors() {
        let dir = tempdir().unwrap();
        let removed = ensure_absent(dir.path(), &["dist/prm.pex", ".pex-build*", "prm.egg-info"])
            .unwrap();
        assert!(removed.is_empty());
    }

    #[test]
    fn test_removes_file_and_directory() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("dist")).unwrap();
        std::fs::write(dir.path().join("dist/prm.pex"), b"old").unwrap();
        std::fs::create_dir_all(dir.path().join("prm.egg-info/sub")).unwrap();
        std::fs::write(dir.path().join("prm.egg-info/sub/PKG-INFO"), b"x").unwrap();

        let removed = ensure_absent(dir.path(), &["dist/prm.pex", "prm.egg-info"]).unwrap();

        assert_eq!(removed.len(), 2);
        assert!(!dir.path().join("dist/prm.pex").exists());
        assert!(!dir.path().join("prm.egg-info").exists());
        // Only the artifact goes, not its directory.
        assert!(dir.path().join("dist").is_dir());
    }

    #[test]
    fn test_glob_removes_every_match() {
        let dir = tempdir().unwrap();
        for name in [".pex-build", ".pex-build-a", ".pex-build.old"] {
            std::fs::create_dir(dir.path().join(name)).unwrap();
        }
        std::fs::create_dir(dir.path().join("keep-me")).unwrap();

        let removed = ensure_absent(dir.path(), &[".pex-build*"]).unwrap();

        assert_eq!(removed.len(), 3);
        assert!(dir.path().join("keep-me").is_dir());
    }

    #[test]
    fn test_second_call_is_noop() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("dist")).unwrap();

        assert_eq!(ensure_absent(dir.path(), &["dist"]).unwrap().len(), 1);
        assert!(ensure_absent(dir.path(), &["dist"]).unwrap().is_empty());
    }

    #[test]
    fn test_rejects_escaping_patterns() {
        let dir = tempdir().unwrap();
        for pattern in ["../outside", "/etc", "", ".", "a/../../b"] {
            assert!(
                ensure_absent(dir.path(), &[pattern]).is_err(),
                "{pattern:?} should be rejected"
            );
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_glob_directory_is_an_error() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let locked = dir.path().join("locked");
        std::fs::create_dir(&locked).unwrap();
        std::fs::write(locked.join("stale.pex"), b"old").unwrap();
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o000)).unwrap();

        // Permission bits do not bind a privileged user.
        let readable = std::fs::read_dir(&locked).is_ok();
        let result = ensure_absent(dir.path(), &["locked/*"]);
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o755)).unwrap();

        if readable {
            return;
        }
        let err = result.unwrap_err();
        assert!(matches!(err, ReleaseError::Io(_)));
        assert!(err.to_string().contains("locked"));
        assert!(locked.join("stale.pex").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_removed_without_following() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("real");
        std::fs::create_dir(&target).unwrap();
        std::fs::write(target.join("keep.txt"), b"keep").unwrap();
        std::os::unix::fs::symlink(&target, dir.path().join("link")).unwrap();

        let removed = ensure_absent(dir.path(), &["link"]).unwrap();

        assert_eq!(removed.len(), 1);
        assert!(target.join("keep.txt").exists());
    }
}
