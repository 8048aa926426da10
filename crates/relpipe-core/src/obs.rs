//! Structured lifecycle events for pipeline runs.
//!
//! Every function emits one `tracing` event with an `event` field naming it,
//! so JSON log consumers can filter on `event = "stage.finished"` etc.

use std::path::PathBuf;

use tracing::{info, warn};

use crate::state::{PipelineState, StageKind};

/// Span covering one run; instrument the run's future with it so every
/// stage event carries the run id.
pub fn run_span(run_id: &str) -> tracing::Span {
    tracing::info_span!("relpipe.run", run_id = %run_id)
}

pub fn emit_run_started(run_id: &str, target: &str, spec_digest: &str) {
    info!(event = "run.started", run_id = %run_id, target = %target, spec_digest = %spec_digest);
}

pub fn emit_stage_started(stage: StageKind, command: &[String]) {
    info!(event = "stage.started", stage = %stage, command = ?command);
}

pub fn emit_stage_finished(stage: StageKind, exit_code: i32, duration_ms: u64, passed: bool) {
    if passed {
        info!(
            event = "stage.finished",
            stage = %stage,
            exit_code = exit_code,
            duration_ms = duration_ms,
            passed = passed,
        );
    } else {
        warn!(
            event = "stage.finished",
            stage = %stage,
            exit_code = exit_code,
            duration_ms = duration_ms,
            passed = passed,
        );
    }
}

/// Emit event: stale or generated paths were removed.
pub fn emit_paths_removed(stage: StageKind, removed: &[PathBuf]) {
    if removed.is_empty() {
        return;
    }
    info!(event = "paths.removed", stage = %stage, count = removed.len(), paths = ?removed);
}

pub fn emit_run_finished(
    run_id: &str,
    final_state: PipelineState,
    exit_code: i32,
    stages_passed: usize,
    stages_failed: usize,
    duration_ms: u64,
) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        final_state = %final_state,
        exit_code = exit_code,
        stages_passed = stages_passed,
        stages_failed = stages_failed,
        duration_ms = duration_ms,
    );
}
