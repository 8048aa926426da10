//! env-manager: isolated dependency environments for relpipe
//!
//! Wraps the external environment tool (pipenv by default) behind a small
//! command-building API, and hashes the dependency manifest so a release
//! run can be tied to the environment it was built in.

pub mod environment;
pub mod error;
pub mod manifest;

pub use environment::EnvironmentManager;
pub use error::EnvError;
pub use manifest::{hash_manifest, HashSource, ManifestHash};

/// Result type for env-manager operations
pub type Result<T> = std::result::Result<T, EnvError>;
