//! Tailer and classifier task supervision.
//!
//! Runs the kernel log tailer and the classifier as two Tokio tasks joined by
//! a single-slot channel, under one shared shutdown signal. Stopping signals
//! shutdown (which kills the log source and aborts any in-flight recovery
//! command), then waits for both tasks to exit.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle};
use tracing::{error, info, warn};

use crate::classifier::{Classifier, DetectionStats, StatsSnapshot};
use crate::command::{CommandRunner, SystemRunner};
use crate::config::{RescueConfig, TailerExitPolicy};
use crate::dmesg::{self, LogRecord, TailError};
use crate::network::NmcliNetworkManager;
use crate::recovery::{Recoverer, RescueAction, Rescuer};
use crate::uptime::{ProcUptime, UptimeSource};

/// Collaborators the supervised tasks run against.
pub struct SupervisorDeps {
    /// Uptime source for the staleness check.
    pub uptime: Arc<dyn UptimeSource>,
    /// Rescue invoked on detection when `rescue = true`.
    pub action: Arc<dyn RescueAction>,
    /// Counters the classifier updates.
    pub stats: Arc<DetectionStats>,
}

impl SupervisorDeps {
    /// Real collaborators: `/proc/uptime`, child processes, and `nmcli`.
    pub fn system(config: &RescueConfig) -> Self {
        let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner);
        Self {
            uptime: Arc::new(ProcUptime::default()),
            action: Arc::new(system_rescuer(config, runner)),
            stats: Arc::new(DetectionStats::default()),
        }
    }
}

/// Build a [`Rescuer`] that queries NetworkManager and runs recovery
/// commands through `runner`.
pub fn system_rescuer(config: &RescueConfig, runner: Arc<dyn CommandRunner>) -> Rescuer {
    let network = Arc::new(NmcliNetworkManager::new(Arc::clone(&runner)));
    let recoverer = Recoverer::new(runner, config.recovery_plan());
    Rescuer::new(network, recoverer, config.recovery.connection_type.clone())
}

/// Failure surfaced when the supervised tasks finish.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    /// The log tailer stopped with an error under [`TailerExitPolicy::Fatal`].
    #[error("log tailer failed: {0}")]
    Tailer(#[from] TailError),
    /// A task panicked or was aborted.
    #[error("{task} task did not finish cleanly: {detail}")]
    Task {
        /// Which task.
        task: &'static str,
        /// Panic or cancellation detail.
        detail: String,
    },
}

/// Handle to the running tailer and classifier tasks.
pub struct Supervisor {
    shutdown_tx: watch::Sender<bool>,
    tailer: JoinHandle<Result<(), TailError>>,
    classifier: JoinHandle<StatsSnapshot>,
    done_rx: watch::Receiver<bool>,
    tailer_exit: TailerExitPolicy,
    stats: Arc<DetectionStats>,
}

impl Supervisor {
    /// Spawn both tasks. Must be called from within a Tokio runtime.
    ///
    /// With `config.rescue == false` the classifier still runs and logs
    /// detections, but never invokes `deps.action`.
    pub fn start(config: &RescueConfig, deps: SupervisorDeps) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        // Capacity 1 is the smallest tokio allows; the tailer blocks on every send.
        let (tx, rx) = mpsc::channel::<LogRecord>(1);

        let action = config.rescue.then_some(deps.action);
        let classifier = Classifier::new(
            config.detection.signature.clone(),
            config.stale_threshold(),
            deps.uptime,
            action,
        )
        .with_stats(Arc::clone(&deps.stats));

        let source = config.log_source();
        let tailer_shutdown = shutdown_rx.clone();
        let tailer = tokio::spawn(async move {
            let result = dmesg::tail(&source, tx, tailer_shutdown).await;
            if let Err(e) = &result {
                error!(error = %e, "dmesg tailer failed");
            }
            result
        });

        // The classifier exits only after the tailer drops its sender, so its
        // exit marks the end of the whole pipeline.
        let (done_tx, done_rx) = watch::channel(false);
        let classifier = tokio::spawn(async move {
            let summary = classifier.run(rx, shutdown_rx).await;
            let _ = done_tx.send(true);
            summary
        });

        info!(rescue = config.rescue, "bluetooth rescue started");
        Self {
            shutdown_tx,
            tailer,
            classifier,
            done_rx,
            tailer_exit: config.supervisor.tailer_exit,
            stats: deps.stats,
        }
    }

    /// Resolve once the pipeline has stopped on its own, e.g. because the
    /// log source exited or failed. Does not request shutdown.
    pub async fn finished(&self) {
        let mut done = self.done_rx.clone();
        // A dropped sender means the classifier task unwound.
        let _ = done.wait_for(|done| *done).await;
    }

    /// Current detection counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Signal shutdown and wait until both tasks have exited.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError`] if a task panicked, or if the tailer failed
    /// and the exit policy is [`TailerExitPolicy::Fatal`].
    pub async fn stop(self) -> Result<StatsSnapshot, SupervisorError> {
        info!("stopping bluetooth rescue");
        // Receivers may already be gone if both tasks exited.
        let _ = self.shutdown_tx.send(true);
        self.join().await
    }

    /// Wait for both tasks to exit on their own (log source closed).
    ///
    /// # Errors
    ///
    /// Same as [`Supervisor::stop`].
    pub async fn join(self) -> Result<StatsSnapshot, SupervisorError> {
        // Keep the sender alive until both tasks are done; dropping it
        // counts as shutdown.
        let Self {
            shutdown_tx,
            tailer,
            classifier,
            tailer_exit,
            ..
        } = self;

        let tailer_result = tailer.await;
        let classifier_result = classifier.await;
        drop(shutdown_tx);

        let summary = classifier_result.map_err(|e| task_failure("classifier", &e))?;

        match tailer_result.map_err(|e| task_failure("tailer", &e))? {
            Ok(()) => {}
            Err(e) if tailer_exit == TailerExitPolicy::LogAndContinue => {
                warn!(error = %e, "continuing without kernel log detection");
            }
            Err(e) => return Err(SupervisorError::Tailer(e)),
        }

        info!(?summary, "bluetooth rescue stopped");
        Ok(summary)
    }
}

fn task_failure(task: &'static str, err: &JoinError) -> SupervisorError {
    error!(task, error = %err, "supervised task did not finish cleanly");
    SupervisorError::Task {
        task,
        detail: err.to_string(),
    }
}
