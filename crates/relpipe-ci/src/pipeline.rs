//! Pipeline orchestration: run a target's stages in order, stop on the
//! first failure, and summarize the run.

use std::path::{Path, PathBuf};
use std::time::{Instant, SystemTime};

use chrono::{DateTime, Utc};
use env_manager::EnvironmentManager;
use relpipe_core::error::EXIT_FAILURE;
use relpipe_core::{
    normalize_exit_code, obs, ArtifactLayout, PipelineState, ReleaseConfig, ReleaseError, Result,
    StageKind,
};
use serde::Serialize;
use tracing::{info, Instrument};

use crate::cleaner::clean;
use crate::gate::{Finding, QualityGate};
use crate::packager::Packager;
use crate::provision::{elapsed_ms, provision};
use crate::runner::{CiRunner, StageResult};
use crate::spec::{detect_git_sha, ReleaseSpec};
use crate::stage::StageConfig;
use crate::verifier::verify;

/// An invocable pipeline target.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    /// Provision, gate, package, verify.
    All,
    /// Provisioning only.
    Venv,
    /// Quality gate only.
    Check,
    /// Package and verify.
    Dist,
    /// Remove generated state and the environment.
    Clean,
}

impl Target {
    /// Stages this target runs, in order.
    pub fn stages(&self) -> &'static [StageKind] {
        match self {
            Target::All => &[
                StageKind::Provision,
                StageKind::QualityGate,
                StageKind::Package,
                StageKind::Verify,
            ],
            Target::Venv => &[StageKind::Provision],
            Target::Check => &[StageKind::QualityGate],
            Target::Dist => &[StageKind::Package, StageKind::Verify],
            Target::Clean => &[StageKind::Teardown],
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Target::All => "all",
            Target::Venv => "venv",
            Target::Check => "check",
            Target::Dist => "dist",
            Target::Clean => "clean",
        }
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-invocation overrides on top of the config file.
#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    /// Quiet provisioning; `None` keeps the configured default.
    pub quiet: Option<bool>,

    /// Key for an isolated artifact layout; `None` uses the shared one.
    pub run_key: Option<String>,

    /// Copy tool output to this process's stdout and stderr while it runs.
    pub stream_output: bool,
}

/// Result of a complete pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineResult {
    pub run_id: String,

    /// Digest of the run specification.
    pub spec_digest: String,

    pub git_sha: Option<String>,

    pub target: Target,

    /// State the run ended in.
    pub final_state: PipelineState,

    /// Whether every stage that ran passed.
    pub success: bool,

    /// Results of the stages that ran; stages after a failure are absent.
    pub stages: Vec<StageResult>,

    /// Quality gate findings, when the gate failed.
    pub findings: Vec<Finding>,

    /// Generated or stale paths removed during the run.
    pub removed: Vec<PathBuf>,

    /// Artifact path, once verified.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<PathBuf>,

    pub started_at: DateTime<Utc>,

    /// Total duration in milliseconds.
    pub duration_ms: u64,
}

impl PipelineResult {
    /// Number of stages that passed.
    pub fn passed_count(&self) -> usize {
        self.stages.iter().filter(|s| s.passed()).count()
    }

    /// Number of stages that failed.
    pub fn failed_count(&self) -> usize {
        self.stages.iter().filter(|s| !s.passed()).count()
    }

    /// First failing stage, if any.
    pub fn failed_stage(&self) -> Option<&StageResult> {
        self.stages.iter().find(|s| !s.passed())
    }

    /// The first failing stage's exit code, or 0.
    pub fn exit_code(&self) -> i32 {
        self.failed_stage()
            .map(|s| normalize_exit_code(s.exit_code))
            .unwrap_or(0)
    }

    /// Classified error for the first failing stage.
    pub fn error(&self) -> Option<ReleaseError> {
        let failed = self.failed_stage()?;
        if failed.stage == StageKind::QualityGate && !self.findings.is_empty() {
            return Some(ReleaseError::QualityViolation {
                findings: self.findings.iter().map(ToString::to_string).collect(),
                exit_code: failed.exit_code,
            });
        }
        let reason = failed.error.clone().unwrap_or_else(|| {
            format!(
                "`{}` exited with code {}",
                failed.command.join(" "),
                failed.exit_code
            )
        });
        Some(ReleaseError::for_stage(failed.stage, reason, failed.exit_code))
    }
}

/// Release pipeline bound to one working tree.
pub struct ReleasePipeline {
    workdir: PathBuf,
    config: ReleaseConfig,
    env: EnvironmentManager,
    layout: ArtifactLayout,
    runner: CiRunner,
    quiet: bool,
    run_key: Option<String>,
}

impl ReleasePipeline {
    /// Validate `config` and bind it to `workdir`.
    ///
    /// The working tree is resolved to an absolute path up front. Every
    /// stage runs with the tree as its current directory, and the artifact
    /// path handed to the verifier must still name the same file there.
    pub fn new(workdir: &Path, config: ReleaseConfig, options: PipelineOptions) -> Result<Self> {
        config.validate()?;

        let workdir = std::fs::canonicalize(workdir).map_err(|e| {
            ReleaseError::InvalidConfig(format!("working tree {}: {e}", workdir.display()))
        })?;
        let env = EnvironmentManager::from_release_config(&workdir, &config)
            .map_err(|e| ReleaseError::InvalidConfig(format!("tools.environment: {e}")))?;
        let layout = match options.run_key.as_deref() {
            Some(key) => ArtifactLayout::isolated(&workdir, &config, key)?,
            None => ArtifactLayout::shared(&workdir, &config),
        };
        let quiet = options.quiet.unwrap_or(config.environment.quiet);

        Ok(Self {
            workdir,
            config,
            env,
            layout,
            runner: CiRunner::new(options.stream_output),
            quiet,
            run_key: options.run_key,
        })
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    pub fn layout(&self) -> &ArtifactLayout {
        &self.layout
    }

    /// Run `target` to completion or first failure.
    pub async fn run(&self, target: Target) -> Result<PipelineResult> {
        self.run_with(target, |_| {}).await
    }

    /// Run `target`, handing each stage result to `on_stage` as soon as the
    /// stage finishes.
    ///
    /// A failing stage moves the run to [`PipelineState::Failed`] and no
    /// later stage runs; the failing stage's exit code becomes the run's.
    pub async fn run_with<F>(&self, target: Target, on_stage: F) -> Result<PipelineResult>
    where
        F: FnMut(&StageResult),
    {
        let stage_names: Vec<String> = target
            .stages()
            .iter()
            .map(|stage| stage.name().to_string())
            .collect();
        let manifest_hash = self.env.manifest_hash().ok().map(|hash| hash.hash);
        let git_sha = detect_git_sha(&self.workdir).await;
        let spec = ReleaseSpec::new(
            &self.config.component,
            &self.workdir,
            &stage_names,
            manifest_hash,
            git_sha,
            self.run_key.as_deref(),
        );

        let span = obs::run_span(&spec.run_id);
        self.execute(target, spec, on_stage).instrument(span).await
    }

    async fn execute<F>(
        &self,
        target: Target,
        spec: ReleaseSpec,
        mut on_stage: F,
    ) -> Result<PipelineResult>
    where
        F: FnMut(&StageResult),
    {
        let start = Instant::now();
        let started_at = Utc::now();
        obs::emit_run_started(&spec.run_id, target.name(), &spec.spec_digest);

        let mut state = PipelineState::Clean;
        let mut stages = Vec::new();
        let mut findings = Vec::new();
        let mut removed = Vec::new();
        let mut built_after: Option<SystemTime> = None;

        for &stage in target.stages() {
            let result = match stage {
                StageKind::Provision => {
                    provision(&self.env, &self.config, self.quiet, self.runner).await
                },
                StageKind::QualityGate => {
                    let (result, gate_findings) = self.run_gate().await;
                    findings = gate_findings;
                    result
                }
                StageKind::Package => {
                    let outcome = Packager::new(&self.config, &self.layout, self.runner)
                        .package()
                        .await;
                    built_after = Some(outcome.started_at);
                    removed.extend(outcome.removed);
                    outcome.result
                }
                StageKind::Verify => {
                    verify(&self.config, &self.layout, built_after, self.runner).await
                }
                StageKind::Teardown => {
                    let outcome = clean(&self.config, &self.env, self.runner).await;
                    removed.extend(outcome.removed);
                    outcome.result
                }
            };

            on_stage(&result);
            state = state.advance(stage, result.passed())?;
            stages.push(result);

            if state.is_failed() {
                info!(stage = %stage, "Stopping after failed stage");
                break;
            }
        }

        let success = !state.is_failed();
        let artifact = (state == PipelineState::Verified).then(|| self.layout.artifact_path());
        let result = PipelineResult {
            run_id: spec.run_id,
            spec_digest: spec.spec_digest,
            git_sha: spec.git_sha,
            target,
            final_state: state,
            success,
            stages,
            findings,
            removed,
            artifact,
            started_at,
            duration_ms: elapsed_ms(start),
        };

        obs::emit_run_finished(
            &result.run_id,
            result.final_state,
            result.exit_code(),
            result.passed_count(),
            result.failed_count(),
            result.duration_ms,
        );
        Ok(result)
    }

    /// Run the linter and apply the gate rule to its output.
    async fn run_gate(&self) -> (StageResult, Vec<Finding>) {
        let start = Instant::now();
        let stage = StageConfig::quality_gate(&self.config);
        let result = match self.runner.execute(&stage, &self.workdir).await {
            Ok(result) => result,
            Err(err) => StageResult::from_error(&stage, &err, elapsed_ms(start)),
        };

        let verdict = QualityGate::evaluate(&result);
        info!(passed = verdict.passed, "{}", verdict.message);
        if verdict.passed {
            return (result, Vec::new());
        }

        // A linter that exits 0 while printing findings still fails the gate.
        let result = if result.passed() {
            result.fail_with(&ReleaseError::QualityViolation {
                findings: verdict.findings.iter().map(ToString::to_string).collect(),
                exit_code: EXIT_FAILURE,
            })
        } else {
            result
        };
        (result, verdict.findings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage_result(stage: StageKind, exit_code: i32) -> StageResult {
        StageResult {
            stage,
            command: vec!["tool".to_string()],
            exit_code,
            stdout: String::new(),
            stderr: String::new(),
            duration_ms: 1,
            success: exit_code == 0,
            error: None,
        }
    }

    fn pipeline_result(stages: Vec<StageResult>) -> PipelineResult {
        PipelineResult {
            run_id: "r".to_string(),
            spec_digest: "d".to_string(),
            git_sha: None,
            target: Target::All,
            final_state: PipelineState::Failed,
            success: false,
            stages,
            findings: Vec::new(),
            removed: Vec::new(),
            artifact: None,
            started_at: Utc::now(),
            duration_ms: 1,
        }
    }

    #[test]
    fn test_target_stages() {
        assert_eq!(Target::All.stages().len(), 4);
        assert_eq!(Target::Check.stages(), &[StageKind::QualityGate]);
        assert_eq!(Target::Dist.stages(), &[StageKind::Package, StageKind::Verify]);
        assert_eq!(Target::Clean.stages(), &[StageKind::Teardown]);
        assert_eq!(Target::Venv.to_string(), "venv");
    }

    #[test]
    fn test_exit_code_is_first_failure() {
        let result = pipeline_result(vec![
            stage_result(StageKind::Provision, 0),
            stage_result(StageKind::QualityGate, 2),
        ]);
        assert_eq!(result.exit_code(), 2);
        assert_eq!(result.passed_count(), 1);
        assert_eq!(result.failed_count(), 1);
        assert!(matches!(
            result.error(),
            Some(ReleaseError::QualityViolation { .. })
        ));
    }

    #[test]
    fn test_signal_exit_never_reads_as_success() {
        let result = pipeline_result(vec![stage_result(StageKind::Verify, -1)]);
        assert_eq!(result.exit_code(), 1);
    }

    #[test]
    fn test_all_passed_exit_zero() {
        let result = pipeline_result(vec![stage_result(StageKind::Provision, 0)]);
        assert_eq!(result.exit_code(), 0);
        assert!(result.error().is_none());
    }

    #[test]
    fn test_invalid_run_key_rejected() {
        let options = PipelineOptions {
            run_key: Some("../escape".to_string()),
            ..Default::default()
        };
        let err = ReleasePipeline::new(Path::new("."), ReleaseConfig::default(), options)
            .err()
            .unwrap();
        assert!(matches!(err, ReleaseError::InvalidConfig(_)));
    }

    #[test]
    fn test_isolated_layout_selected_by_run_key() {
        let dir = tempfile::tempdir().unwrap();
        let options = PipelineOptions {
            quiet: Some(false),
            run_key: Some("ci-7".to_string()),
            ..Default::default()
        };
        let pipeline = ReleasePipeline::new(dir.path(), ReleaseConfig::default(), options).unwrap();
        assert_eq!(pipeline.layout().artifact, PathBuf::from("dist/ci-7/prm.pex"));
    }

    #[test]
    fn test_workdir_resolved_to_absolute_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("tree")).unwrap();
        let dotted = dir.path().join("tree").join("..").join("tree");

        let pipeline =
            ReleasePipeline::new(&dotted, ReleaseConfig::default(), PipelineOptions::default())
                .unwrap();

        assert!(pipeline.workdir().is_absolute());
        assert_eq!(
            pipeline.workdir(),
            std::fs::canonicalize(dir.path().join("tree")).unwrap()
        );
        assert!(pipeline.layout().artifact_path().is_absolute());
    }

    #[test]
    fn test_missing_workdir_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ReleasePipeline::new(
            &dir.path().join("absent"),
            ReleaseConfig::default(),
            PipelineOptions::default(),
        )
        .err()
        .unwrap();
        assert!(matches!(err, ReleaseError::InvalidConfig(_)));
        assert!(err.to_string().contains("absent"));
    }
}
