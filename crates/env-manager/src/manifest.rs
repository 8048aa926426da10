//! Dependency manifest hashing
//!
//! Produces a content-addressable identifier for the declared dependency
//! set, so a run can be tied to the exact environment it was built in.

use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::EnvError;
use crate::Result;

/// Manifest hash - identifies the resolved dependency set
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ManifestHash {
    /// The SHA256 hash
    pub hash: String,
    /// Which file the hash was computed from
    pub source: HashSource,
}

/// Source of the manifest hash
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashSource {
    /// Normalized lock file (fully resolved versions)
    LockFile,
    /// Declared manifest only (no lock file yet)
    Manifest,
}

impl std::fmt::Display for ManifestHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.hash)
    }
}

impl ManifestHash {
    pub fn new(hash: String, source: HashSource) -> Self {
        ManifestHash { hash, source }
    }

    /// Get short hash (first 12 characters)
    pub fn short(&self) -> &str {
        &self.hash[..12.min(self.hash.len())]
    }
}

/// Hash the dependency manifest under `root`.
///
/// Strategy:
/// 1. Parse and re-serialize the lock file, so formatting changes do not
///    change the hash
/// 2. Hash the manifest with normalized line endings
///
/// Fails with [`EnvError::ManifestNotFound`] when neither exists; a run
/// without a declared manifest cannot be provisioned.
pub fn hash_manifest(root: &Path, manifest: &Path, lock_file: &Path) -> Result<ManifestHash> {
    let lock_path = root.join(lock_file);
    if lock_path.is_file() {
        match hash_lock_file(&lock_path) {
            Ok(hash) => return Ok(hash),
            Err(e) => warn!("Lock file unusable, hashing manifest instead: {e}"),
        }
    }

    let manifest_path = root.join(manifest);
    if manifest_path.is_file() {
        return hash_manifest_file(&manifest_path);
    }

    Err(EnvError::ManifestNotFound(manifest_path))
}

fn hash_lock_file(lock_path: &Path) -> Result<ManifestHash> {
    let content = std::fs::read(lock_path)?;

    let value: serde_json::Value =
        serde_json::from_slice(&content).map_err(|e| EnvError::InvalidLockFile {
            path: lock_path.to_path_buf(),
            reason: e.to_string(),
        })?;

    // serde_json maps are ordered by key, so this is canonical.
    let normalized = serde_json::to_vec(&value).map_err(|e| EnvError::InvalidLockFile {
        path: lock_path.to_path_buf(),
        reason: e.to_string(),
    })?;

    let hash = sha256_hex(&normalized);
    debug!("Lock file hash: {}", &hash[..12]);
    Ok(ManifestHash::new(hash, HashSource::LockFile))
}

fn hash_manifest_file(path: &Path) -> Result<ManifestHash> {
    let content = std::fs::read(path)?;
    let hash = sha256_hex(&normalize_text(&content));
    debug!("Manifest hash: {}", &hash[..12]);
    Ok(ManifestHash::new(hash, HashSource::Manifest))
}

/// CRLF to LF, trailing whitespace stripped, single trailing newline.
fn normalize_text(content: &[u8]) -> Vec<u8> {
    let text = String::from_utf8_lossy(content);
    let mut normalized = text
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
        .into_bytes();
    if !normalized.is_empty() {
        normalized.push(b'\n');
    }
    normalized
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn hash_in(dir: &Path) -> Result<ManifestHash> {
        hash_manifest(dir, Path::new("Pipfile"), Path::new("Pipfile.lock"))
    }

    #[test]
    fn test_lock_file_preferred() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("Pipfile"), "[packages]\n").unwrap();
        std::fs::write(dir.path().join("Pipfile.lock"), r#"{"default": {}}"#).unwrap();

        let hash = hash_in(dir.path()).unwrap();
        assert_eq!(hash.source, HashSource::LockFile);
        assert_eq!(hash.hash.len(), 64);
    }

    #[test]
    fn test_lock_file_formatting_does_not_change_hash() {
        let a = tempdir().unwrap();
        let b = tempdir().unwrap();
        std::fs::write(a.path().join("Pipfile.lock"), r#"{"b": 1, "a": 2}"#).unwrap();
        std::fs::write(
            b.path().join("Pipfile.lock"),
            "{\n    \"a\": 2,\n    \"b\": 1\n}\n",
        )
        .unwrap();

        assert_eq!(hash_in(a.path()).unwrap(), hash_in(b.path()).unwrap());
    }

    #[test]
    fn test_changing_dependency_changes_hash() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("Pipfile"), "[packages]\nrequests = \"*\"\n").unwrap();
        let first = hash_in(dir.path()).unwrap();

        std::fs::write(dir.path().join("Pipfile"), "[packages]\nflask = \"*\"\n").unwrap();
        let second = hash_in(dir.path()).unwrap();

        assert_eq!(first.source, HashSource::Manifest);
        assert_ne!(first, second);
    }

    #[test]
    fn test_manifest_line_endings_normalized() {
        let a = tempdir().unwrap();
        let b = tempdir().unwrap();
        std::fs::write(a.path().join("Pipfile"), "[packages]\r\nx = \"*\"\r\n").unwrap();
        std::fs::write(b.path().join("Pipfile"), "[packages]  \nx = \"*\"\n").unwrap();

        assert_eq!(hash_in(a.path()).unwrap(), hash_in(b.path()).unwrap());
    }

    #[test]
    fn test_corrupt_lock_falls_back_to_manifest() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("Pipfile"), "[packages]\n").unwrap();
        std::fs::write(dir.path().join("Pipfile.lock"), "not json").unwrap();

        let hash = hash_in(dir.path()).unwrap();
        assert_eq!(hash.source, HashSource::Manifest);
    }

    #[test]
    fn test_missing_manifest_is_error() {
        let dir = tempdir().unwrap();
        let err = hash_in(dir.path()).unwrap_err();
        assert!(matches!(err, EnvError::ManifestNotFound(_)));
    }

    #[test]
    fn test_short_hash() {
        let hash = ManifestHash::new("abcdef0123456789".to_string(), HashSource::Manifest);
        assert_eq!(hash.short(), "abcdef012345");
    }
}
