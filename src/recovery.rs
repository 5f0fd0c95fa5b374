//! Bluetooth controller recovery.
//!
//! One recovery cycle: unload the driver module, load it again, then bring
//! the dependent NetworkManager connection back up with a bounded number of
//! delayed attempts. Steps run external programs and are never rolled back.
//!
//! The unload step recognises an already-absent module by matching the text
//! `rmmod` prints. That output is an external contract, not something this
//! crate controls.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::command::{wait_for_shutdown, CommandError, CommandOutput, CommandRunner};
use crate::network::{
    resolve_target, ConnectionProfile, NetworkManager, QueryError, ResolveError,
};

/// Output substring `rmmod` prints when the module is already unloaded.
pub const NOT_LOADED_MARKER: &str = "not currently loaded";

/// Driver module bound to the UART-attached controller.
pub const DEFAULT_KERNEL_MODULE: &str = "hci_uart";

/// Connection bring-up attempts per recovery cycle.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 2;

/// Delay before each bring-up attempt.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Fixed parameters of a recovery cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryPlan {
    /// Kernel module to unload and reload.
    pub kernel_module: String,
    /// Maximum connection bring-up attempts.
    pub max_attempts: u32,
    /// Wait before each bring-up attempt.
    pub retry_delay: Duration,
}

impl Default for RecoveryPlan {
    fn default() -> Self {
        Self {
            kernel_module: DEFAULT_KERNEL_MODULE.to_owned(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

/// Non-error result of a recovery cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// NetworkManager already reports the connection active; nothing was run.
    AlreadyActive,
    /// The connection came up on attempt number `attempts`.
    Recovered {
        /// Attempt that succeeded (1-based).
        attempts: u32,
    },
}

/// A recovery step that failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecoveryError {
    /// Unloading the module failed for a reason other than it being absent.
    #[error("rmmod {module} failed with exit code {exit_code:?}, output {output:?}")]
    Unload {
        /// Module name.
        module: String,
        /// Exit code.
        exit_code: Option<i32>,
        /// Combined output.
        output: String,
    },
    /// Loading the module failed.
    #[error("modprobe {module} failed with exit code {exit_code:?}, output {output:?}")]
    Reload {
        /// Module name.
        module: String,
        /// Exit code.
        exit_code: Option<i32>,
        /// Combined output.
        output: String,
    },
    /// Every bring-up attempt failed.
    #[error("failed after {attempts} attempts to bring up connection {connection:?}, last output {output:?}")]
    BringUp {
        /// Attempts made.
        attempts: u32,
        /// Connection id.
        connection: String,
        /// Output of the last attempt.
        output: String,
    },
    /// A step's program could not be run, or was cancelled mid-flight.
    #[error(transparent)]
    Command(#[from] CommandError),
    /// Shutdown was requested between steps.
    #[error("recovery cancelled by shutdown")]
    Cancelled,
}

impl RecoveryError {
    /// Whether this failure was caused by shutdown rather than a broken step.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            Self::Cancelled | Self::Command(CommandError::Cancelled { .. })
        )
    }
}

/// Runs recovery cycles against a known target connection.
pub struct Recoverer {
    runner: Arc<dyn CommandRunner>,
    plan: RecoveryPlan,
}

impl Recoverer {
    /// Create a recoverer that runs commands through `runner`.
    pub fn new(runner: Arc<dyn CommandRunner>, plan: RecoveryPlan) -> Self {
        Self { runner, plan }
    }

    /// The plan this recoverer follows.
    pub fn plan(&self) -> &RecoveryPlan {
        &self.plan
    }

    /// Run one recovery cycle for `target`.
    ///
    /// Not safe to run concurrently for the same device; callers serialise.
    ///
    /// # Errors
    ///
    /// Returns [`RecoveryError`] naming the step that failed.
    pub async fn recover(
        &self,
        target: &ConnectionProfile,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<RecoveryOutcome, RecoveryError> {
        if target.is_active {
            warn!(
                connection = %target.id,
                "not rescuing connection because NetworkManager considers it active"
            );
            return Ok(RecoveryOutcome::AlreadyActive);
        }

        self.unload_module(shutdown).await?;
        self.load_module(shutdown).await?;
        info!(module = %self.plan.kernel_module, "restarted kernel module");

        self.bring_up(&target.id, shutdown).await
    }

    async fn unload_module(&self, shutdown: &watch::Receiver<bool>) -> Result<(), RecoveryError> {
        let module = self.plan.kernel_module.as_str();
        let output = self.runner.run("rmmod", &[module], shutdown).await?;
        if output.success() {
            return Ok(());
        }

        let combined = output.combined();
        if combined.contains(NOT_LOADED_MARKER) {
            debug!(module, output = %combined, "ignoring 'not loaded' error");
            return Ok(());
        }

        Err(RecoveryError::Unload {
            module: module.to_owned(),
            exit_code: output.exit_code,
            output: combined,
        })
    }

    async fn load_module(&self, shutdown: &watch::Receiver<bool>) -> Result<(), RecoveryError> {
        let module = self.plan.kernel_module.as_str();
        let output = self.runner.run("modprobe", &[module], shutdown).await?;
        if output.success() {
            return Ok(());
        }

        Err(RecoveryError::Reload {
            module: module.to_owned(),
            exit_code: output.exit_code,
            output: output.combined(),
        })
    }

    async fn bring_up(
        &self,
        connection: &str,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<RecoveryOutcome, RecoveryError> {
        let tries = self.plan.max_attempts;
        let mut last = CommandOutput::default();

        for attempt in 1..=tries {
            self.delay(shutdown).await?;

            last = self
                .runner
                .run("nmcli", &["connection", "up", connection], shutdown)
                .await?;
            if last.success() {
                info!(connection, attempt, "successfully brought up connection");
                return Ok(RecoveryOutcome::Recovered { attempts: attempt });
            }
            warn!(
                connection,
                attempt,
                tries,
                output = %last.combined(),
                "failed attempt to bring up connection"
            );
        }

        Err(RecoveryError::BringUp {
            attempts: tries,
            connection: connection.to_owned(),
            output: last.combined(),
        })
    }

    async fn delay(&self, shutdown: &watch::Receiver<bool>) -> Result<(), RecoveryError> {
        if *shutdown.borrow() {
            return Err(RecoveryError::Cancelled);
        }
        let mut shutdown = shutdown.clone();
        tokio::select! {
            () = tokio::time::sleep(self.plan.retry_delay) => Ok(()),
            () = wait_for_shutdown(&mut shutdown) => Err(RecoveryError::Cancelled),
        }
    }
}

/// Failure of a full rescue: target lookup or recovery.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RescueError {
    /// The target connection could not be resolved; nothing was run.
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    /// A recovery step failed.
    #[error(transparent)]
    Recovery(#[from] RecoveryError),
}

impl RescueError {
    /// Whether this failure was caused by shutdown.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Recovery(e) => e.is_cancelled(),
            Self::Resolve(ResolveError::Query(QueryError::Command(CommandError::Cancelled {
                ..
            }))) => true,
            Self::Resolve(_) => false,
        }
    }
}

/// Something that can rescue the controller when a hardware error is seen.
#[async_trait]
pub trait RescueAction: Send + Sync {
    /// Run one full rescue.
    async fn rescue(
        &self,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<RecoveryOutcome, RescueError>;
}

/// Resolves the target connection, then runs a recovery cycle against it.
pub struct Rescuer {
    network: Arc<dyn NetworkManager>,
    recoverer: Recoverer,
    connection_type: String,
}

impl Rescuer {
    /// Create a rescuer for connections of type `connection_type`.
    pub fn new(
        network: Arc<dyn NetworkManager>,
        recoverer: Recoverer,
        connection_type: impl Into<String>,
    ) -> Self {
        Self {
            network,
            recoverer,
            connection_type: connection_type.into(),
        }
    }
}

#[async_trait]
impl RescueAction for Rescuer {
    async fn rescue(
        &self,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<RecoveryOutcome, RescueError> {
        let target =
            resolve_target(self.network.as_ref(), &self.connection_type, shutdown).await?;
        info!(connection = %target, "found NetworkManager connection");
        Ok(self.recoverer.recover(&target, shutdown).await?)
    }
}
