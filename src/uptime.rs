//! Device uptime and detected-event age.
//!
//! Kernel log timestamps are seconds since boot, so comparing one against
//! the current uptime tells how long ago the line was written. The result
//! only annotates a detection; it never suppresses a rescue.

use std::path::PathBuf;

use tracing::debug;

/// Source of the current seconds-since-boot value.
pub trait UptimeSource: Send + Sync {
    /// Current uptime in seconds, or `None` when it cannot be read.
    fn seconds(&self) -> Option<f64>;
}

/// Reads uptime from `/proc/uptime`.
#[derive(Debug, Clone)]
pub struct ProcUptime {
    path: PathBuf,
}

impl Default for ProcUptime {
    fn default() -> Self {
        Self::new(PathBuf::from("/proc/uptime"))
    }
}

impl ProcUptime {
    /// Read uptime from a file in `/proc/uptime` format.
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl UptimeSource for ProcUptime {
    fn seconds(&self) -> Option<f64> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => parse_proc_uptime(&contents),
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "failed to read uptime");
                None
            }
        }
    }
}

/// Fixed uptime value, for standalone runs and tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedUptime(pub f64);

impl UptimeSource for FixedUptime {
    fn seconds(&self) -> Option<f64> {
        Some(self.0)
    }
}

/// Parse the first field of `/proc/uptime` (`"<uptime> <idle>\n"`).
pub fn parse_proc_uptime(contents: &str) -> Option<f64> {
    contents.split_whitespace().next()?.parse().ok()
}

/// Seconds between a kernel log timestamp and the current uptime.
///
/// The timestamp token keeps its bracket padding (`"  123.456"`) and is
/// trimmed here. Returns `None` when uptime is unknown or the timestamp is
/// not a number.
pub fn event_age(uptime: Option<f64>, timestamp: &str) -> Option<f64> {
    let uptime = uptime?;
    let logged_at: f64 = timestamp.trim().parse().ok()?;
    Some(uptime - logged_at)
}
