//! btrescue CLI entry point.
//!
//! `start` runs the rescue component until interrupted; `run` exercises the
//! pipeline in one of the standalone modes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::watch;
use tracing::{info, warn};

use btrescue::command::SystemRunner;
use btrescue::component::{API, MODEL};
use btrescue::config::{config_dir, default_config_path, load_config, RescueConfig};
use btrescue::recovery::RescueAction;
use btrescue::registry::default_registry;
use btrescue::supervisor::{system_rescuer, Supervisor, SupervisorDeps};

/// btrescue: kernel-log driven Bluetooth controller repair.
#[derive(Parser)]
#[command(name = "btrescue", version, about)]
struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Run the rescue component until interrupted.
    Start {
        /// Config file (default: ~/.btrescue/btrescue.toml).
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Run a standalone scenario without the component lifecycle.
    Run {
        /// Scenario to run.
        #[arg(long, value_enum)]
        mode: Mode,
        /// Optional config file; `rescue` is overridden by the mode.
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

/// Standalone scenarios.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Follow the kernel log and only log detections.
    Wait,
    /// Follow the kernel log and rescue on every detection.
    WaitRescue,
    /// Rescue once immediately and exit.
    Rescue,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Start { config } => handle_start(config).await,
        Command::Run { mode, config } => handle_run(mode, config).await,
    }
}

/// Run the component through the registry until Ctrl-C.
async fn handle_start(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let config_path = match config_path {
        Some(path) => path,
        None => default_config_path()?,
    };

    let logs_dir = config_dir()?.join("logs");
    let _logging_guard = btrescue::logging::init_production(&logs_dir)?;

    let config = load_config(&config_path)?;
    info!(config = %config_path.display(), rescue = config.rescue, "btrescue starting");

    let registry = default_registry().context("failed to register models")?;
    let component = registry
        .construct(API, MODEL, "bluetooth-rescue", config)
        .context("failed to construct rescue component")?;

    let stopped_on_its_own = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for ctrl-c")?;
            false
        }
        () = component.finished() => true,
    };

    let summary = component.close().await?;
    info!(?summary, "rescue component closed");

    if stopped_on_its_own {
        // The log source exited cleanly, or its failure was tolerated by
        // `tailer_exit = "log_and_continue"`.
        warn!("kernel log detection ended; waiting for shutdown signal");
        tokio::signal::ctrl_c()
            .await
            .context("failed to listen for ctrl-c")?;
    }

    Ok(())
}

/// Run one of the standalone scenarios.
async fn handle_run(mode: Mode, config_path: Option<PathBuf>) -> anyhow::Result<()> {
    btrescue::logging::init_cli();
    info!(?mode, "starting test mode");

    let mut config = read_optional_config(config_path.as_deref())?;
    config.rescue = mode == Mode::WaitRescue;

    if mode == Mode::Rescue {
        info!("rescuing immediately");
        let rescuer = system_rescuer(&config, Arc::new(SystemRunner));
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        // Dropping the rescue future kills any running command.
        let outcome = tokio::select! {
            outcome = rescuer.rescue(&shutdown_rx) => outcome?,
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for ctrl-c")?;
                anyhow::bail!("interrupted before rescue finished");
            }
        };
        info!(?outcome, "rescue finished");
        return Ok(());
    }

    let deps = SupervisorDeps::system(&config);
    let supervisor = Supervisor::start(&config, deps);

    info!("waiting for background tasks");
    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for ctrl-c")?;
        }
        () = supervisor.finished() => {}
    }

    let summary = supervisor.stop().await?;
    info!(?summary, "test mode finished");
    Ok(())
}

fn read_optional_config(path: Option<&Path>) -> anyhow::Result<RescueConfig> {
    match path {
        Some(path) => load_config(path),
        None => Ok(RescueConfig::new(false)),
    }
}
