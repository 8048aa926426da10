//! relpipe CI - the release pipeline itself
//!
//! Provides a pipeline orchestrator that:
//! - Provisions the dependency environment
//! - Enforces the quality gate over the configured source roots
//! - Packages the component into one executable and smoke-tests it
//! - Tears generated state down again, idempotently

pub mod cleaner;
pub mod gate;
pub mod packager;
pub mod pipeline;
pub mod provision;
pub mod runner;
pub mod spec;
pub mod stage;
pub mod verifier;

// Re-export key types
pub use cleaner::{clean, CleanOutcome};
pub use gate::{parse_finding, Finding, GateVerdict, QualityGate};
pub use packager::{PackageOutcome, Packager};
pub use pipeline::{PipelineOptions, PipelineResult, ReleasePipeline, Target};
pub use provision::provision;
pub use runner::{CiRunner, StageResult};
pub use spec::{detect_git_sha, ReleaseSpec};
pub use stage::StageConfig;
pub use verifier::{verify, version_text};
