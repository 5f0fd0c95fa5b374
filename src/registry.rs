//! Model registration.
//!
//! A [`Registry`] maps `(api, model)` pairs to constructors. The binary
//! builds one with [`default_registry`] at startup and constructs components
//! through it; nothing else in the crate depends on registration.

use std::collections::HashMap;

use crate::component::{RescueComponent, API, MODEL};
use crate::config::{ConfigError, RescueConfig};

/// Builds a component from its name and validated-on-construction config.
pub type Constructor = fn(&str, RescueConfig) -> Result<RescueComponent, ConfigError>;

/// A registrable model.
#[derive(Debug, Clone, Copy)]
pub struct ModelDescriptor {
    /// API the model implements.
    pub api: &'static str,
    /// Model name.
    pub model: &'static str,
    /// Constructor invoked by [`Registry::construct`].
    pub constructor: Constructor,
}

impl ModelDescriptor {
    fn key(&self) -> String {
        registry_key(self.api, self.model)
    }
}

/// Registry errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// A model with the same api and name is already registered.
    #[error("model {0} is already registered")]
    Duplicate(String),
    /// No model is registered under the requested api and name.
    #[error("no model registered as {0}")]
    Unknown(String),
    /// The constructor rejected the config.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Known models keyed by `"<api>/<model>"`.
#[derive(Debug, Default)]
pub struct Registry {
    models: HashMap<String, ModelDescriptor>,
}

impl Registry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a model.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Duplicate`] if the key is taken.
    pub fn register(&mut self, descriptor: ModelDescriptor) -> Result<(), RegistryError> {
        let key = descriptor.key();
        if self.models.contains_key(&key) {
            return Err(RegistryError::Duplicate(key));
        }
        self.models.insert(key, descriptor);
        Ok(())
    }

    /// Look up a registered model.
    pub fn lookup(&self, api: &str, model: &str) -> Option<&ModelDescriptor> {
        self.models.get(&registry_key(api, model))
    }

    /// Construct a component of the given model.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Unknown`] for an unregistered model, or
    /// [`RegistryError::Config`] if the constructor rejects the config.
    pub fn construct(
        &self,
        api: &str,
        model: &str,
        name: &str,
        config: RescueConfig,
    ) -> Result<RescueComponent, RegistryError> {
        let descriptor = self
            .lookup(api, model)
            .ok_or_else(|| RegistryError::Unknown(registry_key(api, model)))?;
        Ok((descriptor.constructor)(name, config)?)
    }
}

fn registry_key(api: &str, model: &str) -> String {
    format!("{api}/{model}")
}

/// Descriptor for the bluetooth rescue sensor.
pub fn rescue_model() -> ModelDescriptor {
    ModelDescriptor {
        api: API,
        model: MODEL,
        constructor: RescueComponent::new,
    }
}

/// Registry holding every model this crate provides.
///
/// # Errors
///
/// Returns [`RegistryError::Duplicate`] if two built-in models share a key.
pub fn default_registry() -> Result<Registry, RegistryError> {
    let mut registry = Registry::new();
    registry.register(rescue_model())?;
    Ok(registry)
}
