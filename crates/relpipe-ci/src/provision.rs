//! Environment Provisioner stage.

use std::time::Instant;

use env_manager::{EnvError, EnvironmentManager};
use relpipe_core::error::{EXIT_FAILURE, EXIT_NOT_FOUND};
use relpipe_core::{ReleaseConfig, ReleaseError, StageKind};
use tracing::info;

use crate::runner::{CiRunner, StageResult};
use crate::stage::StageConfig;

/// Ensure the isolated environment exists with runtime and dev dependencies.
///
/// Fails without running the install when the tool is missing or the
/// manifest cannot be found. Re-running against a satisfied environment is
/// left to the tool, which treats it as a no-op.
pub async fn provision(
    env: &EnvironmentManager,
    config: &ReleaseConfig,
    quiet: bool,
    runner: CiRunner,
) -> StageResult {
    let start = Instant::now();
    let stage = StageConfig::provision(env, quiet, config);

    if !env.is_available().await {
        let err = ReleaseError::for_stage(
            StageKind::Provision,
            EnvError::ToolNotFound(env.executable().to_string()).to_string(),
            EXIT_NOT_FOUND,
        );
        return StageResult::from_error(&stage, &err, elapsed_ms(start));
    }

    match env.manifest_hash() {
        Ok(hash) => info!(manifest_hash = %hash.short(), source = ?hash.source, "Provisioning environment"),
        Err(e) => {
            let err = ReleaseError::for_stage(StageKind::Provision, e.to_string(), EXIT_FAILURE);
            return StageResult::from_error(&stage, &err, elapsed_ms(start));
        }
    }

    match runner.execute(&stage, env.root()).await {
        Ok(result) => result,
        Err(err) => StageResult::from_error(&stage, &err, elapsed_ms(start)),
    }
}

pub(crate) fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}
