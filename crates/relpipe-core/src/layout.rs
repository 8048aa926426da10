//! On-disk layout of build byproducts.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::ReleaseConfig;
use crate::error::{ReleaseError, Result};

/// Where the packager writes, relative to the working tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactLayout {
    /// Working tree every other path is relative to.
    pub root: PathBuf,

    /// Directory holding the artifact.
    pub output_dir: PathBuf,

    /// Artifact path.
    pub artifact: PathBuf,

    /// Scratch cache handed to the bundler.
    pub cache_dir: PathBuf,

    /// Scratch directories this layout owns and may remove before a build.
    pub scratch_patterns: Vec<String>,

    /// Dependency metadata directory, when this layout owns it.
    pub metadata_dir: Option<PathBuf>,

    /// Run key for isolated layouts.
    pub run_key: Option<String>,
}

impl ArtifactLayout {
    /// The fixed, shared layout used by a single operator.
    pub fn shared(root: &Path, config: &ReleaseConfig) -> Self {
        let output_dir = config.package.output_dir.clone();
        Self {
            root: root.to_path_buf(),
            artifact: output_dir.join(config.artifact_name()),
            output_dir,
            cache_dir: config.package.cache_dir.clone(),
            scratch_patterns: vec![config.package.scratch_pattern.clone()],
            metadata_dir: Some(config.metadata_dir()),
            run_key: None,
        }
    }

    /// A layout keyed by `run_key` so concurrent runs in one tree do not
    /// share artifact or scratch paths.
    ///
    /// The metadata directory is generated inside the source tree and
    /// cannot be keyed, so isolated runs leave it alone before a build.
    pub fn isolated(root: &Path, config: &ReleaseConfig, run_key: &str) -> Result<Self> {
        validate_run_key(run_key)?;

        let output_dir = config.package.output_dir.join(run_key);
        let mut cache = config.package.cache_dir.clone().into_os_string();
        cache.push("-");
        cache.push(run_key);
        let cache_dir = PathBuf::from(cache);

        Ok(Self {
            root: root.to_path_buf(),
            artifact: output_dir.join(config.artifact_name()),
            output_dir,
            scratch_patterns: vec![cache_dir.to_string_lossy().into_owned()],
            cache_dir,
            metadata_dir: None,
            run_key: Some(run_key.to_string()),
        })
    }

    /// Absolute artifact path.
    pub fn artifact_path(&self) -> PathBuf {
        self.root.join(&self.artifact)
    }

    /// Targets removed before every build: the previous artifact, owned
    /// scratch directories and the metadata directory.
    pub fn pre_build_targets(&self) -> Vec<String> {
        let mut targets = vec![self.artifact.to_string_lossy().into_owned()];
        targets.extend(self.scratch_patterns.iter().cloned());
        if let Some(metadata) = &self.metadata_dir {
            targets.push(metadata.to_string_lossy().into_owned());
        }
        targets
    }
}

/// Targets removed by `clean`, independent of any run key.
pub fn clean_targets(config: &ReleaseConfig) -> Vec<String> {
    vec![
        config.package.scratch_pattern.clone(),
        config.metadata_dir().to_string_lossy().into_owned(),
        config.package.output_dir.to_string_lossy().into_owned(),
    ]
}

fn validate_run_key(run_key: &str) -> Result<()> {
    let well_formed = !run_key.is_empty()
        && !run_key.starts_with('.')
        && run_key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if well_formed {
        Ok(())
    } else {
        Err(ReleaseError::InvalidConfig(format!(
            "run id {run_key:?} must be a plain name of letters, digits, '-', '_' or '.'"
        )))
    }
}
