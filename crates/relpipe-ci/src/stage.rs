//! Stage definitions: which command each pipeline stage runs.

use env_manager::EnvironmentManager;
use relpipe_core::{ArtifactLayout, ReleaseConfig, StageKind};
use serde::{Deserialize, Serialize};

/// Configuration for a single stage invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageConfig {
    /// Which pipeline stage this is.
    pub kind: StageKind,

    /// Command to execute (first element is executable).
    pub command: Vec<String>,

    /// Timeout in seconds; 0 disables it.
    pub timeout_secs: u64,
}

impl StageConfig {
    pub fn new(kind: StageKind, command: Vec<String>, timeout_secs: u64) -> Self {
        Self {
            kind,
            command,
            timeout_secs,
        }
    }

    /// `<env tool> install --dev [--quiet]`
    pub fn provision(env: &EnvironmentManager, quiet: bool, config: &ReleaseConfig) -> Self {
        Self::new(
            StageKind::Provision,
            env.install_command(quiet),
            config.timeouts.provision_secs,
        )
    }

    /// `<linter> <root>...` over the configured roots, in order.
    pub fn quality_gate(config: &ReleaseConfig) -> Self {
        let mut command = config.tools.linter.clone();
        command.extend(
            config
                .quality_gate
                .roots
                .iter()
                .map(|root| root.to_string_lossy().into_owned()),
        );
        Self::new(StageKind::QualityGate, command, config.timeouts.gate_secs)
    }

    /// `<bundler> <src> -D <src> -v --cache-dir=<cache> -o <artifact> -m <entry>`
    pub fn package(config: &ReleaseConfig, layout: &ArtifactLayout) -> Self {
        let pkg = &config.package;
        let source = pkg.source_dir.to_string_lossy().into_owned();

        let mut command = config.tools.packager.clone();
        command.push(source.clone());
        push_flag(&mut command, &pkg.import_path_flag, Some(source));
        push_flag(&mut command, &pkg.verbose_flag, None);
        if !pkg.cache_dir_flag.is_empty() {
            command.push(format!(
                "{}={}",
                pkg.cache_dir_flag,
                layout.cache_dir.to_string_lossy()
            ));
        }
        push_flag(
            &mut command,
            &pkg.output_flag,
            Some(layout.artifact.to_string_lossy().into_owned()),
        );
        push_flag(&mut command, &pkg.entry_point_flag, Some(config.entry_point()));

        Self::new(StageKind::Package, command, config.timeouts.package_secs)
    }

    /// `<artifact> --version`
    pub fn verify(config: &ReleaseConfig, layout: &ArtifactLayout) -> Self {
        Self::new(
            StageKind::Verify,
            vec![
                layout.artifact_path().to_string_lossy().into_owned(),
                config.verify.version_flag.clone(),
            ],
            config.timeouts.verify_secs,
        )
    }

    /// `<env tool> --rm`
    pub fn teardown(env: &EnvironmentManager, config: &ReleaseConfig) -> Self {
        Self::new(
            StageKind::Teardown,
            env.remove_command(),
            config.timeouts.teardown_secs,
        )
    }

    /// Stage name as used in logs and reports.
    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    /// Command line for display; not shell-quoted.
    pub fn display_command(&self) -> String {
        self.command.join(" ")
    }
}

/// Push `flag` (and its value) unless the flag is disabled with "".
fn push_flag(command: &mut Vec<String>, flag: &str, value: Option<String>) {
    if flag.is_empty() {
        return;
    }
    command.push(flag.to_string());
    if let Some(value) = value {
        command.push(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_quality_gate_command_lists_roots_in_order() {
        let config = ReleaseConfig::default();
        let stage = StageConfig::quality_gate(&config);
        assert_eq!(stage.kind, StageKind::QualityGate);
        assert_eq!(
            stage.command,
            vec!["pipenv", "run", "flake8", "prm", "tests", "example", "workloads"]
        );
        assert_eq!(stage.timeout_secs, 300);
    }

    #[test]
    fn test_package_command_matches_stock_invocation() {
        let config = ReleaseConfig::default();
        let layout = ArtifactLayout::shared(Path::new("/work"), &config);
        let stage = StageConfig::package(&config, &layout);
        assert_eq!(
            stage.display_command(),
            "pipenv run pex . -D . -v --cache-dir=.pex-build -o dist/prm.pex -m prm.main:main"
        );
    }

    #[test]
    fn test_package_command_uses_isolated_paths() {
        let config = ReleaseConfig::default();
        let layout = ArtifactLayout::isolated(Path::new("/work"), &config, "r1").unwrap();
        let stage = StageConfig::package(&config, &layout);
        assert!(stage.command.contains(&"--cache-dir=.pex-build-r1".to_string()));
        assert!(stage.command.contains(&"dist/r1/prm.pex".to_string()));
    }

    #[test]
    fn test_disabled_flags_are_omitted() {
        let mut config = ReleaseConfig::default();
        config.package.verbose_flag.clear();
        config.package.import_path_flag.clear();
        let layout = ArtifactLayout::shared(Path::new("/work"), &config);
        let stage = StageConfig::package(&config, &layout);
        assert!(!stage.command.contains(&"-v".to_string()));
        assert!(!stage.command.contains(&"-D".to_string()));
    }

    #[test]
    fn test_verify_invokes_artifact_with_version_flag() {
        let config = ReleaseConfig::default();
        let layout = ArtifactLayout::shared(Path::new("/work"), &config);
        let stage = StageConfig::verify(&config, &layout);
        assert_eq!(stage.command, vec!["/work/dist/prm.pex", "--version"]);
        assert_eq!(stage.name(), "verify");
    }

    #[test]
    fn test_provision_and_teardown_commands() {
        let config = ReleaseConfig::default();
        let env = EnvironmentManager::from_release_config(Path::new("/work"), &config).unwrap();

        let stage = StageConfig::provision(&env, true, &config);
        assert_eq!(stage.command, vec!["pipenv", "install", "--dev", "--quiet"]);

        let stage = StageConfig::teardown(&env, &config);
        assert_eq!(stage.command, vec!["pipenv", "--rm"]);
        assert_eq!(stage.kind, StageKind::Teardown);
    }
}
