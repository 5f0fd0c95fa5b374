//! The rescue agent as a host-managed sensor component.
//!
//! Construction validates the config and starts the supervised pipeline;
//! [`RescueComponent::close`] blocks until both background tasks have
//! stopped. Readings expose the detection counters.
//!
//! Constructing two components for the same device is not guarded against;
//! each would run its own pipeline and rescue independently.

use serde_json::{Map, Value};
use tracing::info;

use crate::classifier::StatsSnapshot;
use crate::config::{ConfigError, RescueConfig};
use crate::supervisor::{Supervisor, SupervisorDeps, SupervisorError};

/// API the component implements.
pub const API: &str = "rdk:component:sensor";

/// Model name the component registers under.
pub const MODEL: &str = "viam:bluetooth-rescue:rescue";

/// A running bluetooth rescue component.
pub struct RescueComponent {
    name: String,
    rescue: bool,
    supervisor: Supervisor,
}

impl std::fmt::Debug for RescueComponent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RescueComponent")
            .field("name", &self.name)
            .field("rescue", &self.rescue)
            .finish_non_exhaustive()
    }
}

impl RescueComponent {
    /// Validate `config` and start the pipeline against the real system.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration is invalid.
    pub fn new(name: &str, config: RescueConfig) -> Result<Self, ConfigError> {
        let deps = SupervisorDeps::system(&config);
        Self::with_deps(name, config, deps)
    }

    /// Validate `config` and start the pipeline with the given collaborators.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration is invalid.
    pub fn with_deps(
        name: &str,
        config: RescueConfig,
        deps: SupervisorDeps,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        info!(name, rescue = config.rescue, "constructing rescue component");
        Ok(Self {
            name: name.to_owned(),
            rescue: config.rescue,
            supervisor: Supervisor::start(&config, deps),
        })
    }

    /// Component name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sensor readings: detection counters plus the rescue flag.
    pub fn readings(&self) -> Map<String, Value> {
        let mut readings = match serde_json::to_value(self.supervisor.stats()) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        readings.insert("rescue".to_owned(), Value::Bool(self.rescue));
        readings
    }

    /// Resolve once the pipeline stopped without being asked to.
    pub async fn finished(&self) {
        self.supervisor.finished().await;
    }

    /// Stop the pipeline and wait for both tasks to exit.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError`] if a task failed.
    pub async fn close(self) -> Result<StatsSnapshot, SupervisorError> {
        info!(name = %self.name, "closing rescue component");
        self.supervisor.stop().await
    }
}
