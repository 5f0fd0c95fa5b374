//! Hardware-error detection on the kernel log stream.
//!
//! Consumes [`LogRecord`]s in order until the tailer closes the channel.
//! Records whose message is exactly the hardware-error signature count as a
//! detection; each detection triggers one rescue, unless rescue is disabled.
//! A failed rescue is logged and the loop moves on to the next record.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use crate::dmesg::LogRecord;
use crate::recovery::{RecoveryOutcome, RescueAction};
use crate::uptime::{event_age, UptimeSource};

/// Kernel message printed when the controller hits the fault.
pub const HARDWARE_ERROR_SIGNATURE: &str = "Bluetooth: hci0: hardware error 0x00";

/// Age above which a detected line is reported as stale.
pub const DEFAULT_STALE_THRESHOLD: Duration = Duration::from_secs(10);

/// Running counters shared between the classifier task and readers.
#[derive(Debug, Default)]
pub struct DetectionStats {
    records_seen: AtomicU64,
    detections: AtomicU64,
    stale_detections: AtomicU64,
    rescues_attempted: AtomicU64,
    rescues_succeeded: AtomicU64,
    rescues_skipped_active: AtomicU64,
    rescues_failed: AtomicU64,
}

/// Point-in-time copy of [`DetectionStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Parsed log records received.
    pub records_seen: u64,
    /// Records matching the hardware-error signature.
    pub detections: u64,
    /// Detections older than the stale threshold.
    pub stale_detections: u64,
    /// Rescues started.
    pub rescues_attempted: u64,
    /// Rescues that brought the connection back up.
    pub rescues_succeeded: u64,
    /// Rescues skipped because the connection was already active.
    pub rescues_skipped_active: u64,
    /// Rescues that returned an error.
    pub rescues_failed: u64,
}

impl DetectionStats {
    /// Copy the current counter values.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            records_seen: self.records_seen.load(Ordering::Relaxed),
            detections: self.detections.load(Ordering::Relaxed),
            stale_detections: self.stale_detections.load(Ordering::Relaxed),
            rescues_attempted: self.rescues_attempted.load(Ordering::Relaxed),
            rescues_succeeded: self.rescues_succeeded.load(Ordering::Relaxed),
            rescues_skipped_active: self.rescues_skipped_active.load(Ordering::Relaxed),
            rescues_failed: self.rescues_failed.load(Ordering::Relaxed),
        }
    }
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Matches log records against the signature and triggers rescues.
pub struct Classifier {
    signature: String,
    stale_threshold: Duration,
    uptime: Arc<dyn UptimeSource>,
    /// `None` when rescue is disabled: detections are only logged.
    action: Option<Arc<dyn RescueAction>>,
    stats: Arc<DetectionStats>,
}

impl Classifier {
    /// Create a classifier. Pass `action: None` to only log detections.
    pub fn new(
        signature: impl Into<String>,
        stale_threshold: Duration,
        uptime: Arc<dyn UptimeSource>,
        action: Option<Arc<dyn RescueAction>>,
    ) -> Self {
        Self {
            signature: signature.into(),
            stale_threshold,
            uptime,
            action,
            stats: Arc::new(DetectionStats::default()),
        }
    }

    /// Share counters with an existing [`DetectionStats`].
    pub fn with_stats(mut self, stats: Arc<DetectionStats>) -> Self {
        self.stats = stats;
        self
    }

    /// Counters updated by this classifier.
    pub fn stats(&self) -> Arc<DetectionStats> {
        Arc::clone(&self.stats)
    }

    /// Whether `record` carries the hardware-error signature.
    pub fn matches(&self, record: &LogRecord) -> bool {
        record.message == self.signature
    }

    /// Consume records until the channel closes, then return final counters.
    ///
    /// `shutdown` is handed to rescues so an in-flight command can be aborted;
    /// the loop itself ends only when every sender is gone.
    pub async fn run(
        &self,
        mut rx: mpsc::Receiver<LogRecord>,
        shutdown: watch::Receiver<bool>,
    ) -> StatsSnapshot {
        if self.action.is_none() {
            info!("not rescuing because rescue=false in config");
        }
        while let Some(record) = rx.recv().await {
            self.handle(&record, &shutdown).await;
        }
        info!("log record channel closed, classifier stopping");
        self.stats.snapshot()
    }

    /// Process one record.
    pub async fn handle(&self, record: &LogRecord, shutdown: &watch::Receiver<bool>) {
        bump(&self.stats.records_seen);
        if !self.matches(record) {
            return;
        }

        bump(&self.stats.detections);
        warn!(timestamp = %record.timestamp, "dmesg tailer found hardware error");

        if let Some(age) = event_age(self.uptime.seconds(), &record.timestamp) {
            if age > self.stale_threshold.as_secs_f64() {
                bump(&self.stats.stale_detections);
                warn!(age_secs = age, "dmesg line is stale");
            }
        }

        let Some(action) = &self.action else {
            return;
        };
        if *shutdown.borrow() {
            info!("shutdown requested, not rescuing");
            return;
        }

        bump(&self.stats.rescues_attempted);
        match action.rescue(shutdown).await {
            Ok(RecoveryOutcome::Recovered { attempts }) => {
                bump(&self.stats.rescues_succeeded);
                info!(attempts, "rescue succeeded");
            }
            Ok(RecoveryOutcome::AlreadyActive) => {
                bump(&self.stats.rescues_skipped_active);
            }
            Err(e) if e.is_cancelled() => {
                bump(&self.stats.rescues_failed);
                warn!(error = %e, "rescue interrupted by shutdown");
            }
            Err(e) => {
                bump(&self.stats.rescues_failed);
                error!(error = %e, "rescue failed");
            }
        }
    }
}
