//! relpipe core
//!
//! Shared building blocks for the release pipeline: configuration, the
//! on-disk layout of build byproducts, the error taxonomy, the run-level
//! state machine and the idempotent removal helper every cleanup step uses.

pub mod config;
pub mod error;
pub mod fs;
pub mod layout;
pub mod obs;
pub mod state;
pub mod telemetry;

pub use config::{
    EnvironmentConfig, PackageConfig, QualityGateConfig, ReleaseConfig, TimeoutConfig,
    ToolsConfig, VerifyConfig, DEFAULT_CONFIG_FILE,
};
pub use error::{normalize_exit_code, ReleaseError, Result};
pub use fs::ensure_absent;
pub use layout::{clean_targets, ArtifactLayout};
pub use state::{PipelineState, StageKind};
pub use telemetry::init_tracing;
