//! Kernel log tailing.
//!
//! Follows `dmesg --follow` as a child process and emits one [`LogRecord`]
//! per line shaped like `[  123.456] message`. Other lines are skipped.
//! Sending blocks on the channel, so a slow consumer throttles reading
//! instead of letting records pile up in memory. A source that exits with a
//! failure status is an error carrying its stderr, not an end of stream.

use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::Child;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::command::wait_for_shutdown;

/// Bracketed monotonic timestamp followed by the message text.
static DMESG_LINE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^\[([\s\d\.]+)\] (.+)$").ok());

/// Bytes of log source stderr kept for error reports.
const STDERR_LIMIT: usize = 4096;

/// How long to wait for stderr to drain after the source exited.
const STDERR_GRACE: Duration = Duration::from_secs(1);

/// A lightly parsed kernel log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Timestamp token exactly as it appeared between the brackets,
    /// including any padding whitespace. Not parsed.
    pub timestamp: String,
    /// Everything after `"] "`.
    pub message: String,
}

/// Parse one kernel log line. Returns `None` for lines without the
/// `[timestamp] message` shape.
pub fn parse_line(line: &str) -> Option<LogRecord> {
    let caps = DMESG_LINE.as_ref()?.captures(line)?;
    Some(LogRecord {
        timestamp: caps.get(1)?.as_str().to_owned(),
        message: caps.get(2)?.as_str().to_owned(),
    })
}

/// The program followed for kernel log lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSource {
    /// Program to execute.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<String>,
}

impl Default for LogSource {
    fn default() -> Self {
        Self {
            program: "dmesg".to_owned(),
            args: vec!["--follow".to_owned()],
        }
    }
}

impl LogSource {
    /// Build a source from a full command line (`[program, args...]`).
    ///
    /// Returns `None` for an empty command line.
    pub fn from_command(command: &[String]) -> Option<Self> {
        let (program, args) = command.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

/// Errors that end log tailing.
#[derive(Debug, thiserror::Error)]
pub enum TailError {
    /// The log source process could not be started.
    #[error("failed to start log source {program}: {source}")]
    Spawn {
        /// Program name.
        program: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// The child was started without a stdout pipe.
    #[error("log source {0} has no stdout")]
    NoStdout(String),
    /// The log source closed its output and exited with a failure status.
    #[error("log source {program} exited with code {exit_code:?}: {stderr}")]
    Exited {
        /// Program name.
        program: String,
        /// Exit code (`None` when killed by a signal).
        exit_code: Option<i32>,
        /// What the source wrote to stderr, trimmed.
        stderr: String,
    },
    /// Reading a line from the log source failed.
    #[error("failed to read from log source: {0}")]
    Read(#[from] std::io::Error),
}

/// Why [`follow_lines`] stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailEnd {
    /// The reader reached end of input.
    Eof,
    /// Shutdown was signalled.
    Shutdown,
    /// The record receiver was dropped.
    ReceiverClosed,
}

/// Follow the configured log source until it closes or shutdown is signalled.
///
/// Returns `Ok(())` when the source's output ends and it exits successfully,
/// when shutdown is requested, or when the receiving side of `tx` is dropped.
/// The child process is killed or reaped before returning.
///
/// # Errors
///
/// Returns [`TailError`] if the process cannot be started, reading fails, or
/// the source exits with a failure status.
pub async fn tail(
    source: &LogSource,
    tx: mpsc::Sender<LogRecord>,
    shutdown: watch::Receiver<bool>,
) -> Result<(), TailError> {
    let mut child = tokio::process::Command::new(&source.program)
        .args(&source.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| TailError::Spawn {
            program: source.program.clone(),
            source: e,
        })?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| TailError::NoStdout(source.program.clone()))?;
    let stderr = child.stderr.take().map(|pipe| tokio::spawn(collect_stderr(pipe)));

    info!(program = %source.program, args = ?source.args, "following kernel log");
    let end = follow_lines(BufReader::new(stdout), tx, shutdown.clone()).await;

    match end {
        Ok(TailEnd::Eof) => reap(source, child, stderr, shutdown).await,
        other => {
            if let Some(task) = stderr {
                task.abort();
            }
            if let Err(e) = child.kill().await {
                // Already exited on its own; nothing left to reap.
                debug!(error = %e, "log source kill failed");
            }
            other.map(|_| ())
        }
    }
}

/// Wait for a source whose output has closed and turn a failure status into
/// [`TailError::Exited`].
async fn reap(
    source: &LogSource,
    mut child: Child,
    stderr: Option<JoinHandle<String>>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), TailError> {
    let status = tokio::select! {
        status = child.wait() => status?,
        () = wait_for_shutdown(&mut shutdown) => {
            debug!("log source still running at shutdown, killing it");
            if let Err(e) = child.kill().await {
                debug!(error = %e, "log source kill failed");
            }
            return Ok(());
        }
    };

    if status.success() {
        info!(program = %source.program, "log source closed");
        return Ok(());
    }

    let stderr = match stderr {
        Some(task) => tokio::time::timeout(STDERR_GRACE, task)
            .await
            .ok()
            .and_then(Result::ok)
            .unwrap_or_default(),
        None => String::new(),
    };
    Err(TailError::Exited {
        program: source.program.clone(),
        exit_code: status.code(),
        stderr,
    })
}

/// Drain a stderr pipe, keeping the first [`STDERR_LIMIT`] bytes.
async fn collect_stderr<R: AsyncRead + Unpin>(mut pipe: R) -> String {
    let mut kept = Vec::new();
    let mut chunk = [0_u8; 1024];
    loop {
        match pipe.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let room = STDERR_LIMIT.saturating_sub(kept.len());
                kept.extend_from_slice(chunk.get(..n.min(room)).unwrap_or_default());
            }
        }
    }
    String::from_utf8_lossy(&kept).trim().to_owned()
}

/// Read lines from `reader`, forwarding every parseable one to `tx`.
///
/// # Errors
///
/// Returns [`TailError::Read`] if reading from `reader` fails.
pub async fn follow_lines<R>(
    mut reader: R,
    tx: mpsc::Sender<LogRecord>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<TailEnd, TailError>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let read = tokio::select! {
            read = reader.read_until(b'\n', &mut buf) => read?,
            () = wait_for_shutdown(&mut shutdown) => {
                debug!("log tail stopping on shutdown");
                return Ok(TailEnd::Shutdown);
            }
        };
        if read == 0 {
            debug!("log source output ended");
            return Ok(TailEnd::Eof);
        }

        // Kernel messages may carry arbitrary bytes.
        let line = String::from_utf8_lossy(&buf);
        let Some(record) = parse_line(line.trim_end_matches(['\n', '\r'])) else {
            continue;
        };

        tokio::select! {
            sent = tx.send(record) => {
                if sent.is_err() {
                    warn!("log record receiver dropped, stopping tail");
                    return Ok(TailEnd::ReceiverClosed);
                }
            }
            () = wait_for_shutdown(&mut shutdown) => {
                debug!("log tail stopping on shutdown");
                return Ok(TailEnd::Shutdown);
            }
        }
    }
}
