//! Artifact Verifier stage: the acceptance test for packaging.

use std::path::Path;
use std::time::{Duration, Instant, SystemTime};

use relpipe_core::error::EXIT_FAILURE;
use relpipe_core::{ArtifactLayout, ReleaseConfig, ReleaseError};
use tracing::info;

use crate::provision::elapsed_ms;
use crate::runner::{CiRunner, StageResult};
use crate::stage::StageConfig;

/// Slack for filesystems that store modification times at second
/// granularity.
const MTIME_SLACK: Duration = Duration::from_secs(2);

/// Run the artifact with the version flag.
///
/// Passes only when the artifact is a non-empty executable file written no
/// earlier than `built_after`, exits 0, and prints version text. Some
/// runtimes print the version on stderr, so either stream counts.
pub async fn verify(
    config: &ReleaseConfig,
    layout: &ArtifactLayout,
    built_after: Option<SystemTime>,
    runner: CiRunner,
) -> StageResult {
    let start = Instant::now();
    let stage = StageConfig::verify(config, layout);

    if let Err(err) = check_artifact_file(&layout.artifact_path(), built_after) {
        return StageResult::from_error(&stage, &err, elapsed_ms(start));
    }

    let result = match runner.execute(&stage, &layout.root).await {
        Ok(result) => result,
        Err(err) => return StageResult::from_error(&stage, &err, elapsed_ms(start)),
    };

    if !result.passed() {
        let reason = format!("artifact exited with code {}", result.exit_code);
        let exit_code = result.exit_code;
        return result.fail_with(&ReleaseError::Verification { reason, exit_code });
    }

    match version_text(&result) {
        Some(version) => {
            info!(version = %version, "Artifact verified");
            result
        }
        None => result.fail_with(&verification_error(format!(
            "artifact printed no version text for {}",
            config.verify.version_flag
        ))),
    }
}

/// First non-empty line of stdout, falling back to stderr.
pub fn version_text(result: &StageResult) -> Option<String> {
    [&result.stdout, &result.stderr]
        .into_iter()
        .flat_map(|text| text.lines())
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
}

fn check_artifact_file(path: &Path, built_after: Option<SystemTime>) -> Result<(), ReleaseError> {
    let meta = std::fs::metadata(path)
        .map_err(|_| verification_error(format!("no artifact at {}", path.display())))?;

    if !meta.is_file() {
        return Err(verification_error(format!(
            "{} is not a regular file",
            path.display()
        )));
    }
    if meta.len() == 0 {
        return Err(verification_error(format!(
            "{} is empty (truncated build?)",
            path.display()
        )));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if meta.permissions().mode() & 0o111 == 0 {
            return Err(verification_error(format!(
                "{} is not executable",
                path.display()
            )));
        }
    }

    if let (Some(threshold), Ok(modified)) = (built_after, meta.modified()) {
        if modified + MTIME_SLACK < threshold {
            return Err(verification_error(format!(
                "{} predates this build (stale artifact)",
                path.display()
            )));
        }
    }

    Ok(())
}

fn verification_error(reason: String) -> ReleaseError {
    ReleaseError::Verification {
        reason,
        exit_code: EXIT_FAILURE,
    }
}
