//! Error taxonomy for the release pipeline.

use std::path::PathBuf;

use crate::state::{PipelineState, StageKind};

/// Exit code used when a stage tool could not be spawned.
pub const EXIT_NOT_FOUND: i32 = 127;

/// Exit code used when a stage exceeded its timeout.
pub const EXIT_TIMEOUT: i32 = 124;

/// Exit code used when no better code is known.
pub const EXIT_FAILURE: i32 = 1;

/// Release pipeline errors.
///
/// The first four variants map one-to-one onto the pipeline stages and carry
/// the exit code that the failing stage propagates to the operator.
#[derive(Debug, thiserror::Error)]
pub enum ReleaseError {
    #[error("environment error: {reason}")]
    Environment { reason: String, exit_code: i32 },

    #[error("quality gate failed with {} violation(s)", findings.len())]
    QualityViolation {
        findings: Vec<String>,
        exit_code: i32,
    },

    #[error("packaging error: {reason}")]
    Packaging { reason: String, exit_code: i32 },

    #[error("verification error: {reason}")]
    Verification { reason: String, exit_code: i32 },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to parse config {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("illegal transition from {from} on {stage}")]
    IllegalTransition { from: PipelineState, stage: StageKind },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ReleaseError {
    /// Build the stage-specific error for `stage`.
    ///
    /// Teardown failures are reported as environment errors since the
    /// environment is the only thing teardown can fail on.
    pub fn for_stage(stage: StageKind, reason: impl Into<String>, exit_code: i32) -> Self {
        let reason = reason.into();
        match stage {
            StageKind::Provision | StageKind::Teardown => Self::Environment { reason, exit_code },
            StageKind::QualityGate => Self::QualityViolation {
                findings: vec![reason],
                exit_code,
            },
            StageKind::Package => Self::Packaging { reason, exit_code },
            StageKind::Verify => Self::Verification { reason, exit_code },
        }
    }

    /// Process exit code to report for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Environment { exit_code, .. }
            | Self::QualityViolation { exit_code, .. }
            | Self::Packaging { exit_code, .. }
            | Self::Verification { exit_code, .. } => normalize_exit_code(*exit_code),
            _ => EXIT_FAILURE,
        }
    }
}

/// Map a raw status code onto something an operator's shell can see.
///
/// Zero and negative codes (signals, unknown status) collapse to
/// [`EXIT_FAILURE`] so a failure is never reported as success.
pub fn normalize_exit_code(code: i32) -> i32 {
    if code <= 0 {
        EXIT_FAILURE
    } else {
        code
    }
}

/// Result type for release pipeline operations.
pub type Result<T> = std::result::Result<T, ReleaseError>;
