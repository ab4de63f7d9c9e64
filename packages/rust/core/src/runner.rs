//! External command execution for the location resolver.
//!
//! [`CommandRunner`] is the seam the resolver invokes commands through;
//! [`ProcessRunner`] is the real implementation on top of `tokio::process`.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, instrument};

use geonote_shared::ResolverConfig;

/// A command to run once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Text written to stdin before it is closed.
    pub stdin: String,
    /// Maximum wall-clock time for the whole invocation.
    pub timeout: Duration,
}

impl From<&ResolverConfig> for CommandSpec {
    fn from(config: &ResolverConfig) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
            stdin: config.payload.clone(),
            timeout: config.timeout,
        }
    }
}

/// Captured output of a command that exited successfully.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Process-level failure of a single invocation. Always retryable.
#[derive(Debug, thiserror::Error)]
pub enum ProcessFailure {
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("command timed out after {}s", .timeout.as_secs_f64())]
    Timeout { timeout: Duration },

    #[error("command exited with {}: {stderr}", exit_label(.code))]
    Exit { code: Option<i32>, stderr: String },

    #[error("I/O error talking to command: {0}")]
    Io(#[source] std::io::Error),
}

fn exit_label(code: &Option<i32>) -> String {
    code.map_or_else(|| "a signal".to_string(), |c| format!("status {c}"))
}

/// Runs external commands on behalf of the resolver.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `spec` to completion.
    ///
    /// A zero exit status yields the captured output, whatever was written to
    /// stderr. Everything else is a [`ProcessFailure`].
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ProcessFailure>;
}

/// [`CommandRunner`] that spawns real processes.
///
/// The child is killed if the timeout elapses.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    #[instrument(skip_all, fields(program = %spec.program))]
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ProcessFailure> {
        let mut child = Command::new(&spec.program)
            .args(&spec.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ProcessFailure::Spawn {
                program: spec.program.clone(),
                source,
            })?;

        let stdin = child.stdin.take();
        let payload = spec.stdin.as_bytes();

        let invocation = async move {
            if let Some(mut stdin) = stdin {
                // The command may exit without reading its input.
                match stdin.write_all(payload).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
                    Err(e) => return Err(e),
                }
                drop(stdin);
            }
            child.wait_with_output().await
        };

        let output = tokio::time::timeout(spec.timeout, invocation)
            .await
            .map_err(|_| ProcessFailure::Timeout {
                timeout: spec.timeout,
            })?
            .map_err(ProcessFailure::Io)?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            return Err(ProcessFailure::Exit {
                code: output.status.code(),
                stderr: stderr.trim().to_string(),
            });
        }

        debug!(
            stdout_len = stdout.len(),
            stderr_len = stderr.len(),
            "command finished"
        );

        Ok(CommandOutput { stdout, stderr })
    }
}
