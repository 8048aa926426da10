//! relpipe - release pipeline CLI
//!
//! Provisions the dependency environment, runs the quality gate, bundles the
//! component into a single executable and smoke-tests it.
//!
//! ## Commands
//!
//! - `all`: provision, gate, package, verify
//! - `venv`: provision the environment only
//! - `flake8` / `check`: quality gate only
//! - `package` / `dist`: package and verify only
//! - `clean`: remove generated state and the environment

use std::future::Future;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::builder::BoolishValueParser;
use clap::{ArgAction, Parser, Subcommand};
use tracing::{error, info, warn};

use relpipe_ci::{PipelineOptions, PipelineResult, ReleasePipeline, StageResult, Target};
use relpipe_core::telemetry::level_for_verbosity;
use relpipe_core::ReleaseConfig;

/// Exit code after an operator interrupt.
const EXIT_INTERRUPTED: i32 = 130;

#[derive(Parser, Debug)]
#[command(name = "relpipe")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Provision, lint, package and verify a component", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Working tree to operate on
    #[arg(short = 'C', long, global = true, default_value = ".")]
    workdir: PathBuf,

    /// Pipeline config (relative to the working tree; default: relpipe.toml when present)
    #[arg(long, global = true, env = "RELPIPE_CONFIG")]
    config: Option<PathBuf>,

    /// Quiet dependency resolution during provisioning (`--quiet=false` to see it)
    #[arg(
        long,
        global = true,
        env = "RELPIPE_QUIET",
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true",
        value_parser = BoolishValueParser::new()
    )]
    quiet: Option<bool>,

    /// Write a JSON run report to this file
    #[arg(long, global = true)]
    report: Option<PathBuf>,

    /// Key output and scratch paths by this id so runs do not collide
    #[arg(long, global = true)]
    run_id: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Commands {
    /// Full pipeline: provision, quality gate, package, verify
    All,

    /// Provision the isolated dependency environment
    Venv,

    /// Run static analysis over the configured source roots
    #[command(visible_alias = "check")]
    Flake8,

    /// Build the executable artifact and verify it
    #[command(visible_alias = "dist")]
    Package,

    /// Remove build byproducts and tear down the environment
    Clean,
}

impl Commands {
    fn target(self) -> Target {
        match self {
            Commands::All => Target::All,
            Commands::Venv => Target::Venv,
            Commands::Flake8 => Target::Check,
            Commands::Package => Target::Dist,
            Commands::Clean => Target::Clean,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    relpipe_core::init_tracing(cli.json, level_for_verbosity(cli.verbose));

    let code = run(&cli).await?;
    std::process::exit(code);
}

/// Run the selected target and return the process exit code.
async fn run(cli: &Cli) -> Result<i32> {
    run_until(cli, interrupted()).await
}

/// Resolves on Ctrl-C; never, if the handler cannot be installed.
async fn interrupted() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Run the selected target, abandoning it when `cancel` resolves first.
async fn run_until<C>(cli: &Cli, cancel: C) -> Result<i32>
where
    C: Future<Output = ()>,
{
    let config = ReleaseConfig::resolve(&cli.workdir, cli.config.as_deref())
        .context("Failed to load pipeline config")?;
    let options = PipelineOptions {
        quiet: cli.quiet,
        run_key: cli.run_id.clone(),
        stream_output: true,
    };
    let pipeline = ReleasePipeline::new(&cli.workdir, config, options)
        .context("Invalid pipeline configuration")?;

    let target = cli.command.target();
    info!(target = %target, workdir = %pipeline.workdir().display(), "Running");
    // Dropping the run future kills the running stage's child process.
    let outcome = tokio::select! {
        result = pipeline.run_with(target, report_stage) => Some(result),
        _ = cancel => None,
    };
    let Some(result) = outcome else {
        warn!(target = %target, "Interrupted");
        return Ok(EXIT_INTERRUPTED);
    };
    let result = result.with_context(|| format!("Pipeline `{target}` could not run"))?;

    if let Some(path) = &cli.report {
        write_report(path, &result)?;
    }
    if let Some(err) = result.error() {
        error!(target = %target, exit_code = result.exit_code(), "{err}");
    }
    Ok(result.exit_code())
}

/// Tool output has already streamed through; add relpipe's own reason when
/// the stage failed without the tool saying why.
fn report_stage(stage: &StageResult) {
    if let Some(reason) = &stage.error {
        warn!(stage = %stage.stage, exit_code = stage.exit_code, "{reason}");
    }
}

fn write_report(path: &Path, result: &PipelineResult) -> Result<()> {
    let json = serde_json::to_string_pretty(result)?;
    std::fs::write(path, json + "\n")
        .with_context(|| format!("Failed to write report to {}", path.display()))
}
