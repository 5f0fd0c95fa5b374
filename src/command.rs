//! External command execution.
//!
//! Every recovery step and every NetworkManager query is an external program.
//! They all go through [`CommandRunner`] so tests can substitute a fake and so
//! a shutdown signal can abort a command that is still running.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::debug;

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Process exit code (`None` when the process was killed by a signal).
    pub exit_code: Option<i32>,
    /// Captured stdout text.
    pub stdout: String,
    /// Captured stderr text.
    pub stderr: String,
}

impl CommandOutput {
    /// Build a successful output with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Build a failed output with the given exit code and stderr.
    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code: Some(exit_code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Returns `true` when the command exited with code 0.
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Combined stdout+stderr output, separated by a newline when both are non-empty.
    pub fn combined(&self) -> String {
        if self.stdout.is_empty() {
            return self.stderr.clone();
        }
        if self.stderr.is_empty() {
            return self.stdout.clone();
        }
        format!("{}\n{}", self.stdout, self.stderr)
    }
}

/// Errors produced before a command could report an exit status.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    /// The program could not be started.
    #[error("failed to start {program}: {detail}")]
    Spawn {
        /// Program name.
        program: String,
        /// Underlying I/O error text.
        detail: String,
    },
    /// Collecting the program's output failed.
    #[error("failed to collect output of {program}: {detail}")]
    Io {
        /// Program name.
        program: String,
        /// Underlying I/O error text.
        detail: String,
    },
    /// Shutdown was requested while the program was running; it was killed.
    #[error("{program} cancelled by shutdown")]
    Cancelled {
        /// Program name.
        program: String,
    },
}

/// Runs external programs and captures their output.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args` to completion.
    ///
    /// A non-zero exit status is *not* an error here; callers inspect
    /// [`CommandOutput`] themselves. Only failures to run the program at all,
    /// or cancellation through `shutdown`, are errors.
    async fn run(
        &self,
        program: &str,
        args: &[&str],
        shutdown: &watch::Receiver<bool>,
    ) -> Result<CommandOutput, CommandError>;
}

/// [`CommandRunner`] backed by real child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(
        &self,
        program: &str,
        args: &[&str],
        shutdown: &watch::Receiver<bool>,
    ) -> Result<CommandOutput, CommandError> {
        if *shutdown.borrow() {
            return Err(CommandError::Cancelled {
                program: program.to_owned(),
            });
        }

        debug!(program, ?args, "running command");
        let child = tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CommandError::Spawn {
                program: program.to_owned(),
                detail: e.to_string(),
            })?;

        let mut shutdown = shutdown.clone();
        tokio::select! {
            result = child.wait_with_output() => {
                let output = result.map_err(|e| CommandError::Io {
                    program: program.to_owned(),
                    detail: e.to_string(),
                })?;
                Ok(CommandOutput {
                    exit_code: output.status.code(),
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                })
            }
            // Dropping the wait future drops the child, and kill_on_drop reaps it.
            () = wait_for_shutdown(&mut shutdown) => {
                debug!(program, "command cancelled by shutdown");
                Err(CommandError::Cancelled { program: program.to_owned() })
            }
        }
    }
}

/// Resolve once the shutdown flag is set or the sender is dropped.
pub async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}
