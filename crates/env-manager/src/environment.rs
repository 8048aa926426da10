//! Isolated dependency environment driven through an external tool
//!
//! The tool itself (pipenv by default) owns resolution and installation;
//! this module only knows how to ask it to install, locate and remove the
//! environment for a working tree.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use relpipe_core::{EnvironmentConfig, ReleaseConfig};
use tokio::process::Command;
use tracing::debug;

use crate::error::EnvError;
use crate::manifest::{hash_manifest, ManifestHash};
use crate::Result;

/// Handle on the environment of one working tree.
#[derive(Debug, Clone)]
pub struct EnvironmentManager {
    root: PathBuf,
    tool: Vec<String>,
    config: EnvironmentConfig,
}

impl EnvironmentManager {
    pub fn new(root: &Path, tool: Vec<String>, config: EnvironmentConfig) -> Result<Self> {
        if tool.first().map_or(true, |exe| exe.is_empty()) {
            return Err(EnvError::EmptyCommand);
        }
        Ok(EnvironmentManager {
            root: root.to_path_buf(),
            tool,
            config,
        })
    }

    pub fn from_release_config(root: &Path, config: &ReleaseConfig) -> Result<Self> {
        Self::new(
            root,
            config.tools.environment.clone(),
            config.environment.clone(),
        )
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Executable of the environment tool.
    pub fn executable(&self) -> &str {
        &self.tool[0]
    }

    /// Install runtime and development dependencies.
    pub fn install_command(&self, quiet: bool) -> Vec<String> {
        let mut command = self.with_tool(&self.config.install_args);
        if quiet && !self.config.quiet_flag.is_empty() {
            command.push(self.config.quiet_flag.clone());
        }
        command
    }

    /// Print the environment location; exits non-zero when there is none.
    pub fn locate_command(&self) -> Vec<String> {
        self.with_tool(&self.config.locate_args)
    }

    /// Tear the environment down.
    pub fn remove_command(&self) -> Vec<String> {
        self.with_tool(&self.config.remove_args)
    }

    /// Hash of the authoritative dependency manifest.
    pub fn manifest_hash(&self) -> Result<ManifestHash> {
        hash_manifest(&self.root, &self.config.manifest, &self.config.lock_file)
    }

    /// Whether the tool can be spawned at all.
    ///
    /// Only spawn failure counts: some tools reject `--version`, which
    /// still proves they are installed.
    pub async fn is_available(&self) -> bool {
        let status = Command::new(self.executable())
            .arg("--version")
            .current_dir(&self.root)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        match status {
            Ok(_) => true,
            Err(e) => {
                debug!(tool = %self.executable(), "Environment tool unavailable: {e}");
                false
            }
        }
    }

    /// Whether an environment currently exists for this tree.
    ///
    /// A missing tool means there can be no environment, so that is
    /// reported as `false` rather than an error.
    pub async fn environment_exists(&self) -> Result<bool> {
        let command = self.locate_command();
        let output = Command::new(&command[0])
            .args(&command[1..])
            .current_dir(&self.root)
            .stdin(Stdio::null())
            .output()
            .await;

        match output {
            Ok(out) => {
                debug!(
                    exists = out.status.success(),
                    location = %String::from_utf8_lossy(&out.stdout).trim(),
                    "Located environment"
                );
                Ok(out.status.success())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn with_tool(&self, args: &[String]) -> Vec<String> {
        let mut command = self.tool.clone();
        command.extend(args.iter().cloned());
        command
    }
}
