//! Packager stage: clean-slate bundling into a single artifact.

use std::path::PathBuf;
use std::time::{Instant, SystemTime};

use relpipe_core::error::EXIT_FAILURE;
use relpipe_core::{ensure_absent, obs, ArtifactLayout, ReleaseConfig, ReleaseError, StageKind};
use tracing::debug;

use crate::provision::elapsed_ms;
use crate::runner::{CiRunner, StageResult};
use crate::stage::StageConfig;

/// Outcome of one packaging attempt.
#[derive(Debug, Clone)]
pub struct PackageOutcome {
    pub result: StageResult,

    /// Stale paths removed before the build.
    pub removed: Vec<PathBuf>,

    /// Taken before pre-cleanup; an artifact older than this is stale.
    pub started_at: SystemTime,
}

/// Builds the artifact described by a layout.
pub struct Packager<'a> {
    config: &'a ReleaseConfig,
    layout: &'a ArtifactLayout,
    runner: CiRunner,
}

impl<'a> Packager<'a> {
    pub fn new(config: &'a ReleaseConfig, layout: &'a ArtifactLayout, runner: CiRunner) -> Self {
        Self {
            config,
            layout,
            runner,
        }
    }

    /// Remove stale state, invoke the bundler, and check its output.
    ///
    /// 1. Previous artifact, owned scratch directories and the metadata
    ///    directory are removed if present.
    /// 2. The bundler runs with the fixed import path, verbosity, cache
    ///    directory, output path and entry point.
    /// 3. A zero exit without a regular file at the artifact path is still
    ///    a packaging failure.
    pub async fn package(&self) -> PackageOutcome {
        let started_at = SystemTime::now();
        let start = Instant::now();
        let stage = StageConfig::package(self.config, self.layout);

        let removed = match ensure_absent(&self.layout.root, &self.layout.pre_build_targets()) {
            Ok(removed) => removed,
            Err(e) => {
                let err = packaging_error(format!("pre-build cleanup failed: {e}"));
                return PackageOutcome {
                    result: StageResult::from_error(&stage, &err, elapsed_ms(start)),
                    removed: Vec::new(),
                    started_at,
                };
            }
        };
        obs::emit_paths_removed(StageKind::Package, &removed);

        let output_dir = self.layout.root.join(&self.layout.output_dir);
        if let Err(e) = std::fs::create_dir_all(&output_dir) {
            let err = packaging_error(format!(
                "cannot create output directory {}: {e}",
                output_dir.display()
            ));
            return PackageOutcome {
                result: StageResult::from_error(&stage, &err, elapsed_ms(start)),
                removed,
                started_at,
            };
        }

        let result = match self.runner.execute(&stage, &self.layout.root).await {
            Ok(result) => result,
            Err(err) => StageResult::from_error(&stage, &err, elapsed_ms(start)),
        };

        let result = if result.passed() {
            self.check_artifact(result)
        } else {
            result
        };

        PackageOutcome {
            result,
            removed,
            started_at,
        }
    }

    fn check_artifact(&self, result: StageResult) -> StageResult {
        let artifact = self.layout.artifact_path();
        match std::fs::metadata(&artifact) {
            Ok(meta) if meta.is_file() => {
                debug!(artifact = %artifact.display(), bytes = meta.len(), "Artifact written");
                result
            }
            Ok(_) => result.fail_with(&packaging_error(format!(
                "{} is not a regular file",
                artifact.display()
            ))),
            Err(_) => result.fail_with(&packaging_error(format!(
                "packaging tool reported success but wrote no artifact at {}",
                artifact.display()
            ))),
        }
    }
}

fn packaging_error(reason: String) -> ReleaseError {
    ReleaseError::Packaging {
        reason,
        exit_code: EXIT_FAILURE,
    }
}
