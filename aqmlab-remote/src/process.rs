//! Local-process implementation of the [`RemoteChannel`] contract.
//!
//! Commands run through `sh -c` on the machine the driver itself runs on.
//! This backs single-machine testbeds (driver colocated with the bottleneck
//! router) and the integration tests; multi-host deployments plug in an
//! SSH-backed channel implementing the same trait.

use std::process::Stdio;

use tokio::{
    io::{AsyncBufReadExt as _, BufReader},
    process::Command,
    task::JoinHandle,
};

use crate::{CommandOutput, Error, OutputWatch, RemoteChannel, RemoteHandle, Result};

/// Executes commands on the local machine via `sh -c`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessChannel;

impl ProcessChannel {
    pub fn new() -> Self {
        Self
    }

    fn command(command_line: &str, env: &[(String, String)]) -> Result<Command> {
        if command_line.trim().is_empty() {
            return Err(Error::Empty);
        }
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command_line)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (key, value) in env {
            cmd.env(key, value);
        }
        Ok(cmd)
    }
}

#[async_trait::async_trait]
impl RemoteChannel for ProcessChannel {
    async fn run(&self, command: &str) -> Result<CommandOutput> {
        tracing::debug!(command, "running command");
        let out = Self::command(command, &[])?.output().await?;
        let output = CommandOutput {
            command: command.to_string(),
            exit_code: out.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&out.stdout).to_string(),
            stderr: String::from_utf8_lossy(&out.stderr).to_string(),
        };
        if !output.success() {
            tracing::debug!(%output, "command returned non-zero status");
            return Err(Error::NonZero(output));
        }
        Ok(output)
    }

    async fn spawn(
        &self,
        command: &str,
        env: &[(String, String)],
        watch: Option<OutputWatch>,
    ) -> Result<Box<dyn RemoteHandle>> {
        tracing::debug!(command, "spawning command");
        let mut child = Self::command(command, env)?.spawn()?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let command_line = command.to_string();

        let task = tokio::spawn(async move {
            let mut watch = watch;
            let mut out_lines = Vec::new();
            let mut err_lines = Vec::new();

            let mut stdout = BufReader::new(stdout.expect("stdout is piped")).lines();
            let mut stderr = BufReader::new(stderr.expect("stderr is piped")).lines();
            let mut stdout_open = true;
            let mut stderr_open = true;

            // Drain both streams until EOF so the child cannot block on a
            // full pipe; the watch pattern is checked on every line of both.
            while stdout_open || stderr_open {
                tokio::select! {
                    line = stdout.next_line(), if stdout_open => match line {
                        Ok(Some(line)) => {
                            observe_line(&mut watch, &line);
                            out_lines.push(line);
                        }
                        _ => stdout_open = false,
                    },
                    line = stderr.next_line(), if stderr_open => match line {
                        Ok(Some(line)) => {
                            observe_line(&mut watch, &line);
                            err_lines.push(line);
                        }
                        _ => stderr_open = false,
                    },
                }
            }

            let status = child.wait().await?;
            Ok::<_, Error>(CommandOutput {
                command: command_line,
                exit_code: status.code().unwrap_or(-1),
                stdout: join_lines(out_lines),
                stderr: join_lines(err_lines),
            })
        });

        Ok(Box::new(ProcessHandle { task }))
    }

    async fn put(&self, contents: &str, remote_path: &str) -> Result<()> {
        tokio::fs::write(remote_path, contents).await?;
        Ok(())
    }

    async fn reset(&self) -> Result<()> {
        // Nothing to reset for local execution.
        Ok(())
    }
}

fn observe_line(watch: &mut Option<OutputWatch>, line: &str) {
    if let Some(w) = watch {
        if line.contains(&w.pattern) {
            tracing::debug!(pattern = %w.pattern, "watch pattern observed");
            w.notify.notify();
            *watch = None;
        }
    }
}

fn join_lines(lines: Vec<String>) -> String {
    let mut joined = lines.join("\n");
    if !joined.is_empty() {
        joined.push('\n');
    }
    joined
}

/// Handle over the reader task that owns the child process.
#[derive(Debug)]
struct ProcessHandle {
    task: JoinHandle<Result<CommandOutput>>,
}

#[async_trait::async_trait]
impl RemoteHandle for ProcessHandle {
    fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    async fn join(self: Box<Self>) -> Result<CommandOutput> {
        let output = self.task.await??;
        if !output.success() {
            return Err(Error::NonZero(output));
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aqmlab_common::ready_signal;

    #[tokio::test]
    async fn run_captures_output() {
        let channel = ProcessChannel::new();
        let out = channel.run("echo hello").await.unwrap();
        assert_eq!(out.stdout.trim(), "hello");
        assert!(out.success());
    }

    #[tokio::test]
    async fn run_reports_non_zero_exit() {
        let channel = ProcessChannel::new();
        match channel.run("exit 3").await {
            Err(Error::NonZero(out)) => assert_eq!(out.exit_code, 3),
            other => panic!("expected NonZero, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_command_is_rejected() {
        let channel = ProcessChannel::new();
        assert!(matches!(channel.run("   ").await, Err(Error::Empty)));
    }

    #[tokio::test]
    async fn spawn_joins_with_output() {
        let channel = ProcessChannel::new();
        let handle = channel.spawn("echo started; echo oops >&2", &[], None).await.unwrap();
        let out = handle.join().await.unwrap();
        assert_eq!(out.stdout.trim(), "started");
        assert_eq!(out.stderr.trim(), "oops");
    }

    #[tokio::test]
    async fn spawn_passes_environment() {
        let channel = ProcessChannel::new();
        let env = vec![("AQMLAB_TEST_VAR".to_string(), "42".to_string())];
        let handle = channel.spawn("echo $AQMLAB_TEST_VAR", &env, None).await.unwrap();
        let out = handle.join().await.unwrap();
        assert_eq!(out.stdout.trim(), "42");
    }

    #[tokio::test]
    async fn watch_pattern_fires_before_exit() {
        let channel = ProcessChannel::new();
        let (notifier, mut signal) = ready_signal();
        let watch = OutputWatch::new("Ready:", notifier);
        let handle = channel
            .spawn("echo 'Ready: classifier'; sleep 1", &[], Some(watch))
            .await
            .unwrap();

        // The marker must be observable well before the process exits.
        let mut seen = false;
        for _ in 0..20 {
            if signal.try_ready() {
                seen = true;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(25)).await;
        }
        assert!(seen, "watch pattern was not observed");
        assert!(!handle.is_finished());
        handle.join().await.unwrap();
    }
}
