//! Configuration loading and validation.
//!
//! `btrescue.toml` must state `rescue` explicitly. Every other section uses
//! `#[serde(default)]`, so a file holding only `rescue = false` is valid.
//! Unknown keys are rejected at every level.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::classifier::{DEFAULT_STALE_THRESHOLD, HARDWARE_ERROR_SIGNATURE};
use crate::dmesg::LogSource;
use crate::recovery::{
    RecoveryPlan, DEFAULT_KERNEL_MODULE, DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY,
};

/// Upper bound on bring-up attempts per recovery cycle.
pub const MAX_ATTEMPTS_LIMIT: u32 = 10;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RescueConfig {
    /// When false, hardware errors are logged but never repaired.
    pub rescue: bool,

    /// Log source and signature matching.
    #[serde(default)]
    pub detection: DetectionConfig,

    /// Recovery steps.
    #[serde(default)]
    pub recovery: RecoveryConfig,

    /// Task supervision.
    #[serde(default)]
    pub supervisor: SupervisorConfig,
}

/// Log source and signature matching.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DetectionConfig {
    /// Exact kernel message that identifies the fault.
    #[serde(default = "default_signature")]
    pub signature: String,

    /// Age in seconds above which a detection is reported as stale.
    #[serde(default = "default_stale_threshold_secs")]
    pub stale_threshold_secs: u64,

    /// Command line followed for kernel log lines.
    #[serde(default = "default_log_command")]
    pub log_command: Vec<String>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            signature: default_signature(),
            stale_threshold_secs: default_stale_threshold_secs(),
            log_command: default_log_command(),
        }
    }
}

/// Recovery step parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecoveryConfig {
    /// Kernel module to unload and reload.
    #[serde(default = "default_kernel_module")]
    pub kernel_module: String,

    /// NetworkManager connection type to bring back up.
    #[serde(default = "default_connection_type")]
    pub connection_type: String,

    /// Connection bring-up attempts per cycle.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Seconds to wait before each bring-up attempt.
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            kernel_module: default_kernel_module(),
            connection_type: default_connection_type(),
            max_attempts: default_max_attempts(),
            retry_delay_secs: default_retry_delay_secs(),
        }
    }
}

/// What the supervisor does when the log tailer stops with an error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TailerExitPolicy {
    /// Surface the error from the supervisor as a failure of the agent.
    #[default]
    Fatal,
    /// Log the error; the agent keeps running without detection.
    LogAndContinue,
}

/// Task supervision settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SupervisorConfig {
    /// Handling of a failed log tailer.
    #[serde(default)]
    pub tailer_exit: TailerExitPolicy,
}

/// A configuration value outside its allowed range.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid config value for {field}: {reason}")]
pub struct ConfigError {
    /// Dotted path of the offending field.
    pub field: &'static str,
    /// What is wrong with it.
    pub reason: String,
}

impl ConfigError {
    fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

impl RescueConfig {
    /// Config with defaults for everything except `rescue`.
    pub fn new(rescue: bool) -> Self {
        Self {
            rescue,
            detection: DetectionConfig::default(),
            recovery: RecoveryConfig::default(),
            supervisor: SupervisorConfig::default(),
        }
    }

    /// Validate that configuration values are within sane bounds.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.detection.signature.trim().is_empty() {
            return Err(ConfigError::new("detection.signature", "must not be empty"));
        }
        if self
            .detection
            .log_command
            .first()
            .is_none_or(|program| program.is_empty())
        {
            return Err(ConfigError::new(
                "detection.log_command",
                "must name a program",
            ));
        }
        // Passed straight to rmmod/modprobe as an argument.
        let module = &self.recovery.kernel_module;
        if module.is_empty()
            || !module
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(ConfigError::new(
                "recovery.kernel_module",
                format!("{module:?} is not a kernel module name"),
            ));
        }
        if self.recovery.connection_type.trim().is_empty() {
            return Err(ConfigError::new(
                "recovery.connection_type",
                "must not be empty",
            ));
        }
        if !(1..=MAX_ATTEMPTS_LIMIT).contains(&self.recovery.max_attempts) {
            return Err(ConfigError::new(
                "recovery.max_attempts",
                format!("must be between 1 and {MAX_ATTEMPTS_LIMIT}"),
            ));
        }
        Ok(())
    }

    /// Recovery parameters for [`crate::recovery::Recoverer`].
    pub fn recovery_plan(&self) -> RecoveryPlan {
        RecoveryPlan {
            kernel_module: self.recovery.kernel_module.clone(),
            max_attempts: self.recovery.max_attempts,
            retry_delay: Duration::from_secs(self.recovery.retry_delay_secs),
        }
    }

    /// Log source to follow.
    pub fn log_source(&self) -> LogSource {
        LogSource::from_command(&self.detection.log_command).unwrap_or_default()
    }

    /// Stale threshold as a duration.
    pub fn stale_threshold(&self) -> Duration {
        Duration::from_secs(self.detection.stale_threshold_secs)
    }
}

/// Parse and validate configuration from TOML text.
///
/// # Errors
///
/// Returns an error if the text is not valid TOML for [`RescueConfig`]
/// (including a missing `rescue` key) or fails validation.
pub fn parse_config(contents: &str) -> anyhow::Result<RescueConfig> {
    let config: RescueConfig = toml::from_str(contents).context("failed to parse config")?;
    config.validate()?;
    Ok(config)
}

/// Load configuration from a TOML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read, parsed, or fails validation.
pub fn load_config(path: &Path) -> anyhow::Result<RescueConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config at {}", path.display()))?;
    parse_config(&contents).with_context(|| format!("invalid config at {}", path.display()))
}

/// Root directory for btrescue state (`~/.btrescue/`).
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn config_dir() -> anyhow::Result<PathBuf> {
    let home = directories::BaseDirs::new()
        .ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
    Ok(home.home_dir().join(".btrescue"))
}

/// Default config file location (`~/.btrescue/btrescue.toml`).
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn default_config_path() -> anyhow::Result<PathBuf> {
    Ok(config_dir()?.join("btrescue.toml"))
}

// Default value functions for serde.

fn default_signature() -> String {
    HARDWARE_ERROR_SIGNATURE.to_owned()
}

fn default_stale_threshold_secs() -> u64 {
    DEFAULT_STALE_THRESHOLD.as_secs()
}

fn default_log_command() -> Vec<String> {
    let source = LogSource::default();
    std::iter::once(source.program).chain(source.args).collect()
}

fn default_kernel_module() -> String {
    DEFAULT_KERNEL_MODULE.to_owned()
}

fn default_connection_type() -> String {
    "bluetooth".to_owned()
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_retry_delay_secs() -> u64 {
    DEFAULT_RETRY_DELAY.as_secs()
}
