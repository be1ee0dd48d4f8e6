//! Execution seam between the action runner and the process boundary.

use std::{path::Path, process::Stdio};

use async_trait::async_trait;
use command_group::AsyncCommandGroup;
use sandbox_core::AbortSignal;
use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    process::Command,
    sync::mpsc,
};

use sandbox_terminal::shell_command;

/// Channel the executor streams output chunks into, stdout and stderr
/// interleaved in arrival order.
pub type OutputSink = mpsc::UnboundedSender<String>;

/// How an execution ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecOutcome {
    /// Process ran to completion with this exit code.
    Exited(i32),
    /// The abort signal was observed before completion.
    Aborted,
}

/// Executor error.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("failed to spawn shell: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Trait for command execution backends.
///
/// Implementations must observe `signal` at their yield points and resolve
/// to `ExecOutcome::Aborted` instead of reporting completion — cancellation
/// is cooperative, never preemptive.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Run `command` under `cwd`, streaming output chunks into `output`.
    ///
    /// # Errors
    /// Returns an error when the process cannot be spawned or its pipes
    /// fail; exit codes are data, not errors.
    async fn execute(
        &self,
        command: &str,
        cwd: &Path,
        signal: AbortSignal,
        output: OutputSink,
    ) -> Result<ExecOutcome, ExecutorError>;
}

/// Production executor: one-shot `$SHELL -c` in a fresh process group.
///
/// The group matters for abort — killing just the shell would orphan
/// whatever it spawned.
#[derive(Debug, Default, Clone, Copy)]
pub struct ShellExecutor;

#[async_trait]
impl Executor for ShellExecutor {
    async fn execute(
        &self,
        command: &str,
        cwd: &Path,
        signal: AbortSignal,
        output: OutputSink,
    ) -> Result<ExecOutcome, ExecutorError> {
        let (program, flag) = shell_command();
        let mut cmd = Command::new(program);
        cmd.arg(flag)
            .arg(command)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.group_spawn().map_err(ExecutorError::Spawn)?;

        let stdout = child.inner().stdout.take();
        let stderr = child.inner().stderr.take();
        let stdout_pump = stdout.map(|pipe| tokio::spawn(pump(pipe, output.clone())));
        let stderr_pump = stderr.map(|pipe| tokio::spawn(pump(pipe, output)));

        let outcome = tokio::select! {
            status = child.wait() => ExecOutcome::Exited(status?.code().unwrap_or(-1)),
            () = signal.cancelled() => {
                tracing::debug!("abort signal observed, killing process group");
                if let Err(err) = child.start_kill() {
                    tracing::warn!(%err, "failed to kill process group");
                }
                let _ = child.wait().await;
                ExecOutcome::Aborted
            }
        };

        // the pipes hit EOF once the group is gone; drain them fully
        if let Some(task) = stdout_pump {
            let _ = task.await;
        }
        if let Some(task) = stderr_pump {
            let _ = task.await;
        }

        Ok(outcome)
    }
}

async fn pump<R: AsyncRead + Unpin + Send>(mut pipe: R, sink: OutputSink) {
    let mut buf = [0u8; 4096];
    loop {
        match pipe.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let chunk = String::from_utf8_lossy(&buf[..n]).into_owned();
                if sink.send(chunk).is_err() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use sandbox_core::abort_channel;

    use super::*;

    async fn run_shell(command: &str) -> (Result<ExecOutcome, ExecutorError>, String) {
        let (_handle, signal) = abort_channel();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let result = ShellExecutor
            .execute(command, &std::env::temp_dir(), signal, tx)
            .await;
        let mut captured = String::new();
        while let Ok(chunk) = rx.try_recv() {
            captured.push_str(&chunk);
        }
        (result, captured)
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_captures_stdout_and_exit_code() {
        let (result, captured) = run_shell("echo hello").await;
        assert_eq!(result.unwrap(), ExecOutcome::Exited(0));
        assert!(captured.contains("hello"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_captures_stderr_too() {
        let (result, captured) = run_shell("echo oops 1>&2; exit 3").await;
        assert_eq!(result.unwrap(), ExecOutcome::Exited(3));
        assert!(captured.contains("oops"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_abort_interrupts_sleep() {
        let (handle, signal) = abort_channel();
        let (tx, _rx) = mpsc::unbounded_channel();
        let exec = tokio::spawn(async move {
            ShellExecutor
                .execute("sleep 30", &std::env::temp_dir(), signal, tx)
                .await
        });

        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        handle.abort();

        let outcome = tokio::time::timeout(std::time::Duration::from_secs(5), exec)
            .await
            .expect("abort should end the execution promptly")
            .unwrap()
            .unwrap();
        assert_eq!(outcome, ExecOutcome::Aborted);
    }
}
