//! Stage execution: spawn the external tool and capture its output.

use std::io::ErrorKind;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use relpipe_core::error::{EXIT_NOT_FOUND, EXIT_TIMEOUT};
use relpipe_core::{obs, ReleaseError, Result, StageKind};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::{Child, Command};

use crate::stage::StageConfig;

/// Result of a stage execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageResult {
    pub stage: StageKind,

    /// Command that ran, for the report.
    pub command: Vec<String>,

    /// Exit code (0 = success).
    pub exit_code: i32,

    /// Captured stdout.
    pub stdout: String,

    /// Captured stderr.
    pub stderr: String,

    /// Duration in milliseconds.
    pub duration_ms: u64,

    /// Whether execution succeeded.
    pub success: bool,

    /// Why the stage failed beyond its exit code, e.g. a missing artifact.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StageResult {
    /// Whether this stage passed (exit code 0).
    pub fn passed(&self) -> bool {
        self.success && self.exit_code == 0
    }

    /// A stage that never produced output of its own: spawn failure,
    /// timeout, or a check relpipe performs itself.
    pub fn from_error(config: &StageConfig, err: &ReleaseError, duration_ms: u64) -> Self {
        Self {
            stage: config.kind,
            command: config.command.clone(),
            exit_code: err.exit_code(),
            stdout: String::new(),
            stderr: String::new(),
            duration_ms,
            success: false,
            error: Some(err.to_string()),
        }
    }

    /// A stage that needed no external command.
    pub fn skipped_ok(stage: StageKind) -> Self {
        Self {
            stage,
            command: Vec::new(),
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
            duration_ms: 0,
            success: true,
            error: None,
        }
    }

    /// Mark a stage failed after the fact, keeping the tool's output.
    pub fn fail_with(mut self, err: &ReleaseError) -> Self {
        self.success = false;
        self.exit_code = err.exit_code();
        self.error = Some(err.to_string());
        self
    }
}

/// Executes stage commands in a working tree.
///
/// Output is always captured into the [`StageResult`]; an echoing runner
/// also copies it to this process's stdout and stderr as it arrives, so a
/// long build shows progress and an interrupted stage still shows what it
/// printed.
#[derive(Debug, Clone, Copy, Default)]
pub struct CiRunner {
    echo: bool,
}

impl CiRunner {
    pub fn new(echo: bool) -> Self {
        Self { echo }
    }

    /// Execute a single stage in `workdir` and return the result.
    ///
    /// A non-zero exit is a normal (failed) [`StageResult`]. Only failures
    /// to run the tool at all are errors: a missing executable maps to exit
    /// code 127 and a timeout to 124, both classified by stage.
    ///
    /// The child is killed if this future is dropped, so a timeout or an
    /// operator interrupt never leaves the tool running.
    pub async fn execute(&self, config: &StageConfig, workdir: &Path) -> Result<StageResult> {
        let start = Instant::now();

        if config.command.is_empty() {
            return Err(ReleaseError::InvalidConfig(format!(
                "stage {} has empty command",
                config.kind
            )));
        }

        obs::emit_stage_started(config.kind, &config.command);

        let exe = &config.command[0];
        let args = &config.command[1..];

        let mut command = Command::new(exe);
        command
            .args(args)
            .current_dir(workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let child = spawn_with_retry(&mut command)
            .await
            .map_err(|e| spawn_error(config.kind, exe, e))?;

        let output = collect_output(child, self.echo);
        let (status, stdout, stderr) = if config.timeout_secs > 0 {
            tokio::time::timeout(Duration::from_secs(config.timeout_secs), output)
                .await
                .map_err(|_| {
                    ReleaseError::for_stage(
                        config.kind,
                        format!(
                            "`{}` timed out after {} seconds",
                            config.display_command(),
                            config.timeout_secs
                        ),
                        EXIT_TIMEOUT,
                    )
                })??
        } else {
            output.await?
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        let exit_code = status.code().unwrap_or(-1);
        let success = status.success();

        obs::emit_stage_finished(config.kind, exit_code, duration_ms, success);

        Ok(StageResult {
            stage: config.kind,
            command: config.command.clone(),
            exit_code,
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            duration_ms,
            success,
            error: None,
        })
    }
}

/// Wait for `child` while draining both pipes. Owns the child, so dropping
/// the returned future kills it.
async fn collect_output(
    mut child: Child,
    echo: bool,
) -> std::io::Result<(ExitStatus, Vec<u8>, Vec<u8>)> {
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let out = async {
        match stdout {
            Some(pipe) => drain(pipe, echo.then(tokio::io::stdout)).await,
            None => Ok(Vec::new()),
        }
    };
    let err = async {
        match stderr {
            Some(pipe) => drain(pipe, echo.then(tokio::io::stderr)).await,
            None => Ok(Vec::new()),
        }
    };

    let (status, stdout, stderr) = tokio::try_join!(child.wait(), out, err)?;
    Ok((status, stdout, stderr))
}

/// Read `reader` to the end, copying each chunk to `echo` when given.
async fn drain<R, W>(mut reader: R, mut echo: Option<W>) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut captured = Vec::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(captured);
        }
        captured.extend_from_slice(&buf[..n]);
        if let Some(sink) = echo.as_mut() {
            sink.write_all(&buf[..n]).await?;
            sink.flush().await?;
        }
    }
}

/// `ETXTBSY`: the executable is still open for writing somewhere.
const TEXT_FILE_BUSY: i32 = 26;

/// Spawn, retrying briefly while a just-written executable is still busy.
async fn spawn_with_retry(command: &mut Command) -> std::io::Result<tokio::process::Child> {
    let mut attempts = 0;
    loop {
        match command.spawn() {
            Err(e) if e.raw_os_error() == Some(TEXT_FILE_BUSY) && attempts < 5 => {
                attempts += 1;
                tokio::time::sleep(Duration::from_millis(20 * attempts)).await;
            }
            other => return other,
        }
    }
}

fn spawn_error(stage: StageKind, exe: &str, err: std::io::Error) -> ReleaseError {
    match err.kind() {
        ErrorKind::NotFound => {
            ReleaseError::for_stage(stage, format!("`{exe}` not found"), EXIT_NOT_FOUND)
        }
        ErrorKind::PermissionDenied => {
            ReleaseError::for_stage(stage, format!("`{exe}` is not executable"), 126)
        }
        _ => ReleaseError::for_stage(stage, format!("failed to run `{exe}`: {err}"), 1),
    }
}
