//! Pipeline configuration.
//!
//! Loaded from an optional `relpipe.toml`; every section and field has a
//! default, so an empty file (or no file) describes the stock layout:
//! `pipenv` for the environment, `flake8` for the gate and `pex` for the
//! bundle at `dist/<component>.pex`.

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ReleaseError, Result};

/// Config file looked up in the working directory when none is given.
pub const DEFAULT_CONFIG_FILE: &str = "relpipe.toml";

/// Top-level pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ReleaseConfig {
    /// Name of the packaged component; drives the default artifact,
    /// metadata directory and entry point names.
    pub component: String,

    /// External tool commands (first element is the executable).
    pub tools: ToolsConfig,

    pub environment: EnvironmentConfig,

    pub quality_gate: QualityGateConfig,

    pub package: PackageConfig,

    pub verify: VerifyConfig,

    pub timeouts: TimeoutConfig,
}

impl Default for ReleaseConfig {
    fn default() -> Self {
        Self {
            component: "prm".to_string(),
            tools: ToolsConfig::default(),
            environment: EnvironmentConfig::default(),
            quality_gate: QualityGateConfig::default(),
            package: PackageConfig::default(),
            verify: VerifyConfig::default(),
            timeouts: TimeoutConfig::default(),
        }
    }
}

/// Commands for the three opaque collaborators.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ToolsConfig {
    pub environment: Vec<String>,
    pub linter: Vec<String>,
    pub packager: Vec<String>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            environment: strings(&["pipenv"]),
            linter: strings(&["pipenv", "run", "flake8"]),
            packager: strings(&["pipenv", "run", "pex"]),
        }
    }
}

/// Environment provisioning settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct EnvironmentConfig {
    /// Declared dependency manifest.
    pub manifest: PathBuf,

    /// Resolved lock file, preferred for the manifest hash when present.
    pub lock_file: PathBuf,

    /// Suppress informational output during dependency resolution.
    pub quiet: bool,

    pub install_args: Vec<String>,
    pub quiet_flag: String,
    pub locate_args: Vec<String>,
    pub remove_args: Vec<String>,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            manifest: PathBuf::from("Pipfile"),
            lock_file: PathBuf::from("Pipfile.lock"),
            quiet: true,
            install_args: strings(&["install", "--dev"]),
            quiet_flag: "--quiet".to_string(),
            locate_args: strings(&["--venv"]),
            remove_args: strings(&["--rm"]),
        }
    }
}

/// Source roots scanned by the quality gate, in order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct QualityGateConfig {
    pub roots: Vec<PathBuf>,
}

impl Default for QualityGateConfig {
    fn default() -> Self {
        Self {
            roots: ["prm", "tests", "example", "workloads"]
                .iter()
                .map(PathBuf::from)
                .collect(),
        }
    }
}

/// Bundler invocation and output layout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct PackageConfig {
    /// Directory holding the artifact; removed wholesale by `clean`.
    pub output_dir: PathBuf,

    /// Artifact file name; defaults to `<component>.pex`.
    pub artifact_name: Option<String>,

    /// Scratch cache handed to the bundler.
    pub cache_dir: PathBuf,

    /// Glob matching every scratch directory a previous run may have left.
    pub scratch_pattern: String,

    /// Dependency metadata directory; defaults to `<component>.egg-info`.
    pub metadata_dir: Option<PathBuf>,

    /// `module:callable`; defaults to `<component>.main:main`.
    pub entry_point: Option<String>,

    /// Project directory handed to the bundler.
    pub source_dir: PathBuf,

    pub import_path_flag: String,
    pub verbose_flag: String,
    pub cache_dir_flag: String,
    pub output_flag: String,
    pub entry_point_flag: String,
}

impl Default for PackageConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("dist"),
            artifact_name: None,
            cache_dir: PathBuf::from(".pex-build"),
            scratch_pattern: ".pex-build*".to_string(),
            metadata_dir: None,
            entry_point: None,
            source_dir: PathBuf::from("."),
            import_path_flag: "-D".to_string(),
            verbose_flag: "-v".to_string(),
            cache_dir_flag: "--cache-dir".to_string(),
            output_flag: "-o".to_string(),
            entry_point_flag: "-m".to_string(),
        }
    }
}

/// Smoke-test settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct VerifyConfig {
    pub version_flag: String,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            version_flag: "--version".to_string(),
        }
    }
}

/// Per-stage timeouts in seconds; 0 disables the timeout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct TimeoutConfig {
    pub provision_secs: u64,
    pub gate_secs: u64,
    pub package_secs: u64,
    pub verify_secs: u64,
    pub teardown_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            provision_secs: 900,
            gate_secs: 300,
            package_secs: 1800,
            verify_secs: 60,
            teardown_secs: 300,
        }
    }
}

impl ReleaseConfig {
    /// Parse a config from TOML text. `origin` is only used in errors.
    pub fn from_toml_str(text: &str, origin: &Path) -> Result<Self> {
        let config: ReleaseConfig =
            toml::from_str(text).map_err(|source| ReleaseError::ConfigParse {
                path: origin.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate the config at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "Loading pipeline config");
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text, path)
    }

    /// Resolve the config for a run in `workdir`.
    ///
    /// An explicit path must exist. Otherwise `relpipe.toml` in the working
    /// directory is used when present, and the defaults when not.
    pub fn resolve(workdir: &Path, explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            let path = if path.is_absolute() {
                path.to_path_buf()
            } else {
                workdir.join(path)
            };
            return Self::load(&path);
        }

        let candidate = workdir.join(DEFAULT_CONFIG_FILE);
        if candidate.is_file() {
            Self::load(&candidate)
        } else {
            debug!("No {DEFAULT_CONFIG_FILE} found, using defaults");
            let config = Self::default();
            config.validate()?;
            Ok(config)
        }
    }

    /// Reject configurations the pipeline cannot run safely.
    pub fn validate(&self) -> Result<()> {
        if self.component.trim().is_empty() {
            return invalid("component must not be empty");
        }
        for (name, command) in [
            ("tools.environment", &self.tools.environment),
            ("tools.linter", &self.tools.linter),
            ("tools.packager", &self.tools.packager),
        ] {
            if command.first().map_or(true, |exe| exe.trim().is_empty()) {
                return invalid(&format!("{name} must name an executable"));
            }
        }
        if self.quality_gate.roots.is_empty() {
            return invalid("quality_gate.roots must list at least one source root");
        }
        if self.entry_point().split_once(':').map_or(true, |(m, f)| m.is_empty() || f.is_empty()) {
            return invalid("package.entry_point must look like module:callable");
        }
        if self.verify.version_flag.trim().is_empty() {
            return invalid("verify.version_flag must not be empty");
        }

        check_relative("package.output_dir", &self.package.output_dir)?;
        check_relative("package.cache_dir", &self.package.cache_dir)?;
        check_relative("package.metadata_dir", &self.metadata_dir())?;
        check_relative("package.scratch_pattern", Path::new(&self.package.scratch_pattern))?;

        let artifact = self.artifact_name();
        if artifact.is_empty() || artifact.contains(['/', '\\']) {
            return invalid("package.artifact_name must be a plain file name");
        }
        Ok(())
    }

    pub fn artifact_name(&self) -> String {
        self.package
            .artifact_name
            .clone()
            .unwrap_or_else(|| format!("{}.pex", self.component))
    }

    pub fn metadata_dir(&self) -> PathBuf {
        self.package
            .metadata_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("{}.egg-info", self.component)))
    }

    pub fn entry_point(&self) -> String {
        self.package
            .entry_point
            .clone()
            .unwrap_or_else(|| format!("{}.main:main", self.component))
    }
}

fn check_relative(field: &str, path: &Path) -> Result<()> {
    let escapes = path
        .components()
        .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)));
    if path.as_os_str().is_empty() || escapes {
        return invalid(&format!(
            "{field} must be a relative path inside the working tree, got {:?}",
            path
        ));
    }
    Ok(())
}

fn invalid<T>(reason: &str) -> Result<T> {
    Err(ReleaseError::InvalidConfig(reason.to_string()))
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_describe_stock_layout() {
        let config = ReleaseConfig::default();
        config.validate().unwrap();
        assert_eq!(config.artifact_name(), "prm.pex");
        assert_eq!(config.metadata_dir(), PathBuf::from("prm.egg-info"));
        assert_eq!(config.entry_point(), "prm.main:main");
        assert_eq!(config.quality_gate.roots.len(), 4);
        assert!(config.environment.quiet);
    }

    #[test]
    fn test_empty_toml_is_default() {
        let config = ReleaseConfig::from_toml_str("", Path::new("relpipe.toml")).unwrap();
        assert_eq!(config, ReleaseConfig::default());
    }

    #[test]
    fn test_component_drives_derived_names() {
        let text = r#"
            component = "widget"

            [quality_gate]
            roots = ["widget", "tests"]
        "#;
        let config = ReleaseConfig::from_toml_str(text, Path::new("relpipe.toml")).unwrap();
        assert_eq!(config.artifact_name(), "widget.pex");
        assert_eq!(config.entry_point(), "widget.main:main");
        assert_eq!(
            config.quality_gate.roots,
            vec![PathBuf::from("widget"), PathBuf::from("tests")]
        );
    }

    #[test]
    fn test_unknown_field_is_parse_error() {
        let err = ReleaseConfig::from_toml_str("colour = \"blue\"", Path::new("x.toml"))
            .unwrap_err();
        assert!(matches!(err, ReleaseError::ConfigParse { .. }));
        assert!(err.to_string().contains("x.toml"));
    }

    #[test]
    fn test_rejects_empty_roots() {
        let text = "[quality_gate]\nroots = []\n";
        let err = ReleaseConfig::from_toml_str(text, Path::new("relpipe.toml")).unwrap_err();
        assert!(err.to_string().contains("quality_gate.roots"));
    }

    #[test]
    fn test_rejects_escaping_output_dir() {
        let text = "[package]\noutput_dir = \"../elsewhere\"\n";
        let err = ReleaseConfig::from_toml_str(text, Path::new("relpipe.toml")).unwrap_err();
        assert!(err.to_string().contains("package.output_dir"));

        let text = "[package]\noutput_dir = \"/tmp/dist\"\n";
        assert!(ReleaseConfig::from_toml_str(text, Path::new("relpipe.toml")).is_err());
    }

    #[test]
    fn test_rejects_bad_entry_point() {
        let text = "[package]\nentry_point = \"prm.main\"\n";
        let err = ReleaseConfig::from_toml_str(text, Path::new("relpipe.toml")).unwrap_err();
        assert!(err.to_string().contains("module:callable"));
    }

    #[test]
    fn test_rejects_empty_tool() {
        let text = "[tools]\nlinter = []\n";
        let err = ReleaseConfig::from_toml_str(text, Path::new("relpipe.toml")).unwrap_err();
        assert!(err.to_string().contains("tools.linter"));
    }

    #[test]
    fn test_resolve_prefers_workdir_file() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join(DEFAULT_CONFIG_FILE),
            "component = \"from_file\"\n",
        )
        .unwrap();

        let config = ReleaseConfig::resolve(dir.path(), None).unwrap();
        assert_eq!(config.component, "from_file");
    }

    #[test]
    fn test_resolve_falls_back_to_defaults() {
        let dir = tempdir().unwrap();
        let config = ReleaseConfig::resolve(dir.path(), None).unwrap();
        assert_eq!(config, ReleaseConfig::default());
    }

    #[test]
    fn test_resolve_explicit_missing_is_error() {
        let dir = tempdir().unwrap();
        let err = ReleaseConfig::resolve(dir.path(), Some(Path::new("nope.toml"))).unwrap_err();
        assert!(matches!(err, ReleaseError::Io(_)));
    }
}
