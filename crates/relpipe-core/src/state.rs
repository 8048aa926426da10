//! Pipeline stages and the run-level state machine.
//!
//! ```text
//! Clean --provision--> Provisioned --gate--> GatePassed --package--> Packaged --verify--> Verified
//!   any stage failure ---------------------------------------------------------------> Failed
//!   teardown (from any state, including Failed) -----------------------------------> Clean
//! ```
//!
//! Standalone sub-chains enter the machine part-way: `check` runs the gate
//! from `Clean`, `dist` packages from `Clean`.

use serde::{Deserialize, Serialize};

use crate::error::{ReleaseError, Result};

/// A single pipeline stage.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Materialize the isolated dependency environment.
    Provision,

    /// Static analysis over the configured source roots.
    QualityGate,

    /// Stale-artifact cleanup followed by bundling.
    Package,

    /// Version-flag smoke test of the fresh artifact.
    Verify,

    /// Removal of generated state and the environment.
    Teardown,
}

impl StageKind {
    pub fn name(&self) -> &'static str {
        match self {
            StageKind::Provision => "provision",
            StageKind::QualityGate => "quality_gate",
            StageKind::Package => "package",
            StageKind::Verify => "verify",
            StageKind::Teardown => "teardown",
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Pipeline-level state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    #[default]
    Clean,
    Provisioned,
    GatePassed,
    Packaged,
    Verified,
    Failed,
}

impl PipelineState {
    /// Apply the outcome of `stage` to this state.
    ///
    /// Returns [`ReleaseError::IllegalTransition`] when the stage cannot run
    /// from the current state, e.g. verifying without a packaged artifact or
    /// running anything but teardown after a failure.
    pub fn advance(self, stage: StageKind, passed: bool) -> Result<PipelineState> {
        use PipelineState::*;

        let illegal = || ReleaseError::IllegalTransition { from: self, stage };

        if stage == StageKind::Teardown {
            return Ok(if passed { Clean } else { Failed });
        }
        if self == Failed {
            return Err(illegal());
        }
        if !passed {
            return Ok(Failed);
        }

        match (self, stage) {
            (Clean | Provisioned, StageKind::Provision) => Ok(Provisioned),
            (Clean | Provisioned, StageKind::QualityGate) => Ok(GatePassed),
            (Clean | GatePassed, StageKind::Package) => Ok(Packaged),
            (Packaged, StageKind::Verify) => Ok(Verified),
            _ => Err(illegal()),
        }
    }

    /// Whether the run has stopped on a failure.
    pub fn is_failed(&self) -> bool {
        *self == PipelineState::Failed
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PipelineState::Clean => "CLEAN",
            PipelineState::Provisioned => "PROVISIONED",
            PipelineState::GatePassed => "GATE_PASSED",
            PipelineState::Packaged => "PACKAGED",
            PipelineState::Verified => "VERIFIED",
            PipelineState::Failed => "FAILED",
        };
        f.write_str(name)
    }
}
