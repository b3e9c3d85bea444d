//! External process execution for command tasks.
//!
//! [`run_command`] spawns the process, captures stdout/stderr, and kills it
//! when the timeout expires or the cancellation token fires. Either way the
//! run is reported as a failure.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::error::CoreError;

/// Maximum stdout or stderr size captured per stream (10 MiB).
///
/// Output exceeding this limit is truncated.
const MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct ProcessInput {
    pub program: String,
    pub args: Vec<String>,
    pub env_vars: BTreeMap<String, String>,
    pub working_directory: Option<PathBuf>,
    pub timeout: Duration,
}

impl ProcessInput {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env_vars: BTreeMap::new(),
            working_directory: None,
            timeout,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    /// Command line for logs.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub duration_ms: u64,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Turn a non-zero exit into an error.
    pub fn check(self) -> Result<Self, ProcessError> {
        if self.success() {
            Ok(self)
        } else {
            Err(ProcessError::ExecutionFailed {
                exit_code: self.exit_code,
                stderr: self.stderr,
            })
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Process timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("Process was cancelled")]
    Cancelled,

    #[error("Process exited with code {exit_code}: {stderr}")]
    ExecutionFailed { exit_code: i32, stderr: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ProcessError> for CoreError {
    fn from(err: ProcessError) -> Self {
        match err {
            ProcessError::Cancelled => CoreError::Cancelled,
            other => CoreError::TaskFailed(other.to_string()),
        }
    }
}

enum Outcome {
    Exited(std::io::Result<ExitStatus>),
    TimedOut,
    Cancelled,
}

/// Spawn `input.program`, capture its output and wait for it to exit.
pub async fn run_command(
    input: &ProcessInput,
    cancel: &CancellationToken,
) -> Result<ProcessOutput, ProcessError> {
    let mut cmd = Command::new(&input.program);
    cmd.args(&input.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    for (key, value) in &input.env_vars {
        cmd.env(key, value);
    }
    if let Some(dir) = &input.working_directory {
        cmd.current_dir(dir);
    }

    let start = Instant::now();
    let mut child = cmd.spawn()?;

    let stdout_handle = child.stdout.take();
    let stderr_handle = child.stderr.take();
    let stdout_task = tokio::spawn(async move { read_stream(stdout_handle).await });
    let stderr_task = tokio::spawn(async move { read_stream(stderr_handle).await });

    let outcome = tokio::select! {
        status = child.wait() => Outcome::Exited(status),
        _ = tokio::time::sleep(input.timeout) => Outcome::TimedOut,
        _ = cancel.cancelled() => Outcome::Cancelled,
    };
    let elapsed_ms = start.elapsed().as_millis() as u64;

    match outcome {
        Outcome::Exited(status) => {
            let status = status?;
            let stdout_bytes = stdout_task.await.unwrap_or_default();
            let stderr_bytes = stderr_task.await.unwrap_or_default();
            Ok(ProcessOutput {
                stdout: String::from_utf8_lossy(&stdout_bytes).into_owned(),
                stderr: String::from_utf8_lossy(&stderr_bytes).into_owned(),
                exit_code: status.code().unwrap_or(-1),
                duration_ms: elapsed_ms,
            })
        }
        Outcome::TimedOut => {
            kill(&mut child, &input.program).await;
            Err(ProcessError::Timeout { elapsed_ms })
        }
        Outcome::Cancelled => {
            kill(&mut child, &input.program).await;
            Err(ProcessError::Cancelled)
        }
    }
}

async fn kill(child: &mut tokio::process::Child, program: &str) {
    if let Err(e) = child.kill().await {
        tracing::warn!(program, error = %e, "Failed to kill process");
    }
}

/// Read an entire output stream into a byte buffer, capped at [`MAX_OUTPUT_BYTES`].
async fn read_stream<R: AsyncRead + Unpin>(handle: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut h) = handle {
        let _ = (&mut h)
            .take(MAX_OUTPUT_BYTES as u64)
            .read_to_end(&mut buf)
            .await;
    }
    buf
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn sh(script: &str, timeout: Duration) -> ProcessInput {
        ProcessInput::new("sh", timeout).arg("-c").arg(script)
    }

    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let output = run_command(&sh("echo hello; echo oops >&2", Duration::from_secs(5)), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(output.stdout.trim(), "hello");
        assert_eq!(output.stderr.trim(), "oops");
        assert!(output.success());
    }

    #[tokio::test]
    async fn non_zero_exit_fails_check() {
        let output = run_command(&sh("exit 3", Duration::from_secs(5)), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(output.exit_code, 3);
        assert_matches!(output.check(), Err(ProcessError::ExecutionFailed { exit_code: 3, .. }));
    }

    #[tokio::test]
    async fn timeout_kills_process() {
        let result = run_command(&sh("sleep 10", Duration::from_millis(100)), &CancellationToken::new()).await;
        assert_matches!(result, Err(ProcessError::Timeout { .. }));
    }

    #[tokio::test]
    async fn cancellation_kills_process() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });
        let result = run_command(&sh("sleep 10", Duration::from_secs(10)), &cancel).await;
        assert_matches!(result, Err(ProcessError::Cancelled));
    }

    #[tokio::test]
    async fn missing_program_is_io_error() {
        let input = ProcessInput::new("/nonexistent/taskline-binary", Duration::from_secs(1));
        let result = run_command(&input, &CancellationToken::new()).await;
        assert_matches!(result, Err(ProcessError::Io(_)));
    }

    #[test]
    fn errors_map_to_core_taxonomy() {
        assert!(CoreError::from(ProcessError::Cancelled).is_cancelled());
        assert_matches!(
            CoreError::from(ProcessError::Timeout { elapsed_ms: 5 }),
            CoreError::TaskFailed(_)
        );
    }

    #[test]
    fn command_line_joins_program_and_args() {
        let input = ProcessInput::new("tool", Duration::from_secs(1)).args(["--in", "a.raw"]);
        assert_eq!(input.command_line(), "tool --in a.raw");
    }
}
