//! Error types for env-manager

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while managing the dependency environment
#[derive(Error, Debug)]
pub enum EnvError {
    /// Environment tool not installed or not in PATH
    #[error("environment tool `{0}` is not installed or not in PATH")]
    ToolNotFound(String),

    /// Dependency manifest missing
    #[error("dependency manifest not found: {0}")]
    ManifestNotFound(PathBuf),

    /// Lock file present but unreadable as JSON
    #[error("invalid lock file {path}: {reason}")]
    InvalidLockFile { path: PathBuf, reason: String },

    /// Empty tool command in configuration
    #[error("environment tool command is empty")]
    EmptyCommand,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
