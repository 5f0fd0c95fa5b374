//! Log output for the rescue agent.
//!
//! `btrescue start` runs as a long-lived daemon and keeps a rotated JSON
//! record of every detection and recovery step next to its stderr output
//! ([`init_production`]). The `run --mode ...` entry points are meant for a
//! terminal session and only write to stderr ([`init_cli`]).
//!
//! Both honour `RUST_LOG`, falling back to [`DEFAULT_FILTER`].

use std::path::Path;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// File name prefix of the daemon log. The appender adds a `.YYYY-MM-DD` suffix.
pub const LOG_FILE_PREFIX: &str = "btrescue.log";

/// Filter used when `RUST_LOG` is unset or unparseable.
pub const DEFAULT_FILTER: &str = "info";

/// Keeps the background log writer of the daemon alive.
///
/// Hold it until `start` returns; dropping it flushes buffered records.
pub struct LoggingGuard {
    _guard: WorkerGuard,
}

/// Install the daemon subscriber used by `btrescue start`.
///
/// Detection and recovery events go to `{logs_dir}/btrescue.log.YYYY-MM-DD`
/// as JSON, one file per day, and to stderr in the plain format.
///
/// # Errors
///
/// Fails when `logs_dir` cannot be created.
pub fn init_production(logs_dir: &Path) -> anyhow::Result<LoggingGuard> {
    std::fs::create_dir_all(logs_dir)
        .with_context(|| format!("failed to create logs directory {}", logs_dir.display()))?;

    let (daily_writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(logs_dir, LOG_FILE_PREFIX));

    tracing_subscriber::registry()
        .with(env_filter())
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(daily_writer),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    Ok(LoggingGuard { _guard: guard })
}

/// Install the terminal subscriber used by `btrescue run`.
pub fn init_cli() {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .init();
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}
