//! The remote-execution contract the experiment coordinator is written
//! against.
//!
//! The coordinator never talks to a concrete transport: it only needs "run a
//! command on host H and get an asynchronous handle". An SSH-backed channel
//! lives outside this workspace; [`process::ProcessChannel`] implements the
//! same contract on the local machine and backs the bundled binary, the
//! examples and the integration tests.

use std::{fmt, io, sync::Arc};

use aqmlab_common::ReadyNotifier;

pub mod process;

pub use process::ProcessChannel;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("empty command provided")]
    Empty,
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("non-zero exit status: {0}")]
    NonZero(CommandOutput),
    #[error("process task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Captured result of a finished remote command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// The command line that was executed.
    pub command: String,
    /// Exit code; -1 when the process was terminated by a signal.
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

impl fmt::Display for CommandOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "`{}` exited with {}", self.command, self.exit_code)?;
        if !self.stderr.is_empty() {
            write!(f, ": {}", self.stderr.trim_end())?;
        }
        Ok(())
    }
}

/// A marker watched for in a spawned process's output stream.
///
/// The notifier fires the first time `pattern` appears in any output line,
/// implementing the readiness rendezvous for monitoring processes.
#[derive(Debug)]
pub struct OutputWatch {
    pub pattern: String,
    pub notify: ReadyNotifier,
}

impl OutputWatch {
    pub fn new(pattern: impl Into<String>, notify: ReadyNotifier) -> Self {
        Self { pattern: pattern.into(), notify }
    }
}

/// One reusable command-execution session per host.
#[async_trait::async_trait]
pub trait RemoteChannel: Send + Sync {
    /// Runs a command to completion. A non-zero exit status is an
    /// [`Error::NonZero`] carrying the full output.
    async fn run(&self, command: &str) -> Result<CommandOutput>;

    /// Starts a command without waiting for it. The returned handle is polled
    /// and joined later; the process itself is stopped by an explicit stop
    /// command, never by dropping the handle.
    async fn spawn(
        &self,
        command: &str,
        env: &[(String, String)],
        watch: Option<OutputWatch>,
    ) -> Result<Box<dyn RemoteHandle>>;

    /// Delivers a small text file to the host's filesystem (classifier
    /// payloads, probe scripts). Bulk artifact download is out of scope.
    async fn put(&self, contents: &str, remote_path: &str) -> Result<()>;

    /// Closes and reopens the underlying session. Called at the start of
    /// every iteration to avoid cross-iteration session corruption.
    async fn reset(&self) -> Result<()>;
}

/// An outstanding asynchronous remote process.
#[async_trait::async_trait]
pub trait RemoteHandle: Send {
    /// Whether the process has terminated (non-blocking).
    fn is_finished(&self) -> bool;

    /// Waits for termination and returns the captured output. A non-zero
    /// exit status is an [`Error::NonZero`] carrying the output.
    async fn join(self: Box<Self>) -> Result<CommandOutput>;
}

/// A testbed host: a role name, its data-plane address and its channel.
#[derive(Clone)]
pub struct Host {
    /// Role label, e.g. `bottleneck` or `load1`.
    pub name: String,
    /// Address on the measurement plane (not the management plane).
    pub data_ip: String,
    pub channel: Arc<dyn RemoteChannel>,
}

impl Host {
    pub fn new(
        name: impl Into<String>,
        data_ip: impl Into<String>,
        channel: Arc<dyn RemoteChannel>,
    ) -> Self {
        Self { name: name.into(), data_ip: data_ip.into(), channel }
    }
}

impl fmt::Debug for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Host")
            .field("name", &self.name)
            .field("data_ip", &self.data_ip)
            .finish_non_exhaustive()
    }
}
