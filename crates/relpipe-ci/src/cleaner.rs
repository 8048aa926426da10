//! Cleaner stage: remove every generated path and the environment.

use std::path::PathBuf;
use std::time::Instant;

use env_manager::EnvironmentManager;
use relpipe_core::error::EXIT_FAILURE;
use relpipe_core::{clean_targets, ensure_absent, obs, ReleaseConfig, ReleaseError, StageKind};
use tracing::info;

use crate::provision::elapsed_ms;
use crate::runner::{CiRunner, StageResult};
use crate::stage::StageConfig;

/// Outcome of a clean.
#[derive(Debug, Clone)]
pub struct CleanOutcome {
    pub result: StageResult,

    /// Paths that existed and were removed.
    pub removed: Vec<PathBuf>,

    /// Whether an environment existed and was torn down.
    pub environment_removed: bool,
}

/// Remove scratch, metadata and output directories, then tear down the
/// environment if one exists.
///
/// Nothing here depends on a previous stage's outcome, and already-clean
/// state is success, so `clean` can always be run twice in a row.
pub async fn clean(
    config: &ReleaseConfig,
    env: &EnvironmentManager,
    runner: CiRunner,
) -> CleanOutcome {
    let start = Instant::now();
    let stage = StageConfig::teardown(env, config);

    let removed = match ensure_absent(env.root(), &clean_targets(config)) {
        Ok(removed) => removed,
        Err(e) => {
            let err = ReleaseError::for_stage(
                StageKind::Teardown,
                format!("cleanup failed: {e}"),
                EXIT_FAILURE,
            );
            return CleanOutcome {
                result: StageResult::from_error(&stage, &err, elapsed_ms(start)),
                removed: Vec::new(),
                environment_removed: false,
            };
        }
    };
    obs::emit_paths_removed(StageKind::Teardown, &removed);

    let exists = match env.environment_exists().await {
        Ok(exists) => exists,
        Err(e) => {
            let err = ReleaseError::for_stage(StageKind::Teardown, e.to_string(), EXIT_FAILURE);
            return CleanOutcome {
                result: StageResult::from_error(&stage, &err, elapsed_ms(start)),
                removed,
                environment_removed: false,
            };
        }
    };

    if !exists {
        info!("No environment to tear down");
        return CleanOutcome {
            result: StageResult::skipped_ok(StageKind::Teardown),
            removed,
            environment_removed: false,
        };
    }

    let result = match runner.execute(&stage, env.root()).await {
        Ok(result) => result,
        Err(err) => StageResult::from_error(&stage, &err, elapsed_ms(start)),
    };
    let environment_removed = result.passed();

    CleanOutcome {
        result,
        removed,
        environment_removed,
    }
}
