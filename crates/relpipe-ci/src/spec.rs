//! Run specification and identity.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::process::Command;
use uuid::Uuid;

/// Identity of one pipeline run.
///
/// Two runs with the same digest executed the same stages over the same
/// component, commit and dependency manifest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReleaseSpec {
    /// Run id: the run key when one was given, otherwise a fresh UUID.
    pub run_id: String,

    /// Component being released.
    pub component: String,

    /// Working tree path.
    pub workdir: PathBuf,

    /// Ordered stage names.
    pub stages: Vec<String>,

    /// SHA-256 digest of ordered stage names (deterministic).
    pub stages_digest: String,

    /// Hash of the dependency manifest, if it could be read.
    pub manifest_hash: Option<String>,

    /// Git commit SHA of the working tree, if it is a repository.
    pub git_sha: Option<String>,

    /// Digest over everything above except the run id.
    pub spec_digest: String,
}

impl ReleaseSpec {
    /// Create a new run specification.
    pub fn new(
        component: &str,
        workdir: &Path,
        stages: &[String],
        manifest_hash: Option<String>,
        git_sha: Option<String>,
        run_key: Option<&str>,
    ) -> Self {
        let stages_digest = compute_stages_digest(stages);
        let spec_digest = compute_spec_digest(
            component,
            &stages_digest,
            manifest_hash.as_deref(),
            git_sha.as_deref(),
        );
        let run_id = run_key
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        Self {
            run_id,
            component: component.to_string(),
            workdir: workdir.to_path_buf(),
            stages: stages.to_vec(),
            stages_digest,
            manifest_hash,
            git_sha,
            spec_digest,
        }
    }
}

/// `git rev-parse HEAD` in `workdir`, or `None` outside a repository or
/// without git installed.
pub async fn detect_git_sha(workdir: &Path) -> Option<String> {
    let output = Command::new("git")
        .args(["rev-parse", "HEAD"])
        .current_dir(workdir)
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let sha = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!sha.is_empty()).then_some(sha)
}

/// Compute deterministic digest of ordered stage names.
fn compute_stages_digest(stages: &[String]) -> String {
    let mut hasher = Sha256::new();
    for stage in stages {
        hasher.update(stage.as_bytes());
        hasher.update(b"\0");
    }
    hex::encode(hasher.finalize())
}

fn compute_spec_digest(
    component: &str,
    stages_digest: &str,
    manifest_hash: Option<&str>,
    git_sha: Option<&str>,
) -> String {
    let mut hasher = Sha256::new();
    for part in [
        Some(component),
        Some(stages_digest),
        manifest_hash,
        git_sha,
    ] {
        hasher.update(part.unwrap_or("-").as_bytes());
        hasher.update(b"\0");
    }
    hex::encode(hasher.finalize())
}
