//! Subprocess execution for external tools.
//!
//! Provides [`run_command`]: spawn, capture stdout/stderr, enforce an
//! optional timeout and stop on cancellation. The child is spawned with
//! `kill_on_drop(true)`, so both the timeout and cancellation paths kill it.

use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::error::PipelineError;

/// Maximum stdout or stderr size captured per stream (10 MiB).
const MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

/// Lines of stderr kept in a failure message.
const STDERR_TAIL_LINES: usize = 20;

/// Captured result of a successful run.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

/// Run `cmd` to completion. A non-zero exit becomes
/// [`PipelineError::ProcessFailed`] carrying the tail of stderr.
pub async fn run_command(
    program: &str,
    cmd: &mut Command,
    timeout: Option<Duration>,
    cancel: &CancellationToken,
) -> Result<CommandOutput, PipelineError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    tracing::debug!(?cmd, "Spawning {program}");
    let start = Instant::now();

    let mut child = cmd.spawn().map_err(|source| PipelineError::Spawn {
        program: program.to_string(),
        source,
    })?;

    // Read stdout/stderr in spawned tasks so we can still call
    // `child.wait()` (which borrows `&mut child`).
    let stdout_handle = child.stdout.take();
    let stderr_handle = child.stderr.take();

    let stdout_task = tokio::spawn(async move { read_stream(stdout_handle).await });
    let stderr_task = tokio::spawn(async move { read_stream(stderr_handle).await });

    let wait = async {
        match timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait()).await.ok(),
            None => Some(child.wait().await),
        }
    };

    let status = tokio::select! {
        _ = cancel.cancelled() => {
            tracing::info!(program, "Cancelled, stopping child process");
            return Err(PipelineError::Cancelled);
        }
        status = wait => status,
    };

    let status = match status {
        Some(Ok(status)) => status,
        Some(Err(source)) => {
            return Err(PipelineError::Spawn {
                program: program.to_string(),
                source,
            })
        }
        None => {
            return Err(PipelineError::ProcessTimeout {
                program: program.to_string(),
                elapsed: start.elapsed(),
            })
        }
    };

    let stdout_bytes = stdout_task.await.unwrap_or_default();
    let stderr_bytes = stderr_task.await.unwrap_or_default();
    let stdout = String::from_utf8_lossy(&stdout_bytes).into_owned();
    let stderr = String::from_utf8_lossy(&stderr_bytes).into_owned();

    if !status.success() {
        return Err(PipelineError::ProcessFailed {
            program: program.to_string(),
            exit_code: status.code(),
            stderr: tail(&stderr, STDERR_TAIL_LINES),
        });
    }

    let duration = start.elapsed();
    tracing::debug!(program, duration_ms = duration.as_millis() as u64, "Process finished");
    Ok(CommandOutput {
        stdout,
        stderr,
        duration,
    })
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

fn tail(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    lines[lines.len().saturating_sub(n)..].join("\n")
}

#[cfg(all(test, unix))]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[tokio::test]
    async fn captures_stdout() {
        let out = run_command("sh", &mut sh("echo hello"), None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn non_zero_exit_keeps_stderr_tail() {
        let err = run_command("sh", &mut sh("echo boom >&2; exit 3"), None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_matches!(
            err,
            PipelineError::ProcessFailed { exit_code: Some(3), ref stderr, .. } if stderr == "boom"
        );
    }

    #[tokio::test]
    async fn timeout_kills_process() {
        let err = run_command(
            "sh",
            &mut sh("sleep 5"),
            Some(Duration::from_millis(50)),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert_matches!(err, PipelineError::ProcessTimeout { .. });
    }

    #[tokio::test]
    async fn cancellation_stops_process() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = run_command("sh", &mut sh("sleep 5"), None, &cancel).await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn missing_program_is_spawn_error() {
        let mut cmd = Command::new("definitely-not-a-real-program-xyz");
        let err = run_command("xyz", &mut cmd, None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_matches!(err, PipelineError::Spawn { .. });
    }

    #[test]
    fn tail_keeps_last_lines() {
        assert_eq!(tail("a\nb\nc", 2), "b\nc");
        assert_eq!(tail("a", 5), "a");
    }
}
