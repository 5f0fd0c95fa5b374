//! Model registration and construction through the registry.

use btrescue::component::{RescueComponent, API, MODEL};
use btrescue::config::{ConfigError, RescueConfig};
use btrescue::registry::{
    default_registry, rescue_model, ModelDescriptor, Registry, RegistryError,
};

fn refuse(_name: &str, _config: RescueConfig) -> Result<RescueComponent, ConfigError> {
    Err(ConfigError {
        field: "rescue",
        reason: "refused by test constructor".to_owned(),
    })
}

#[test]
fn default_registry_knows_rescue_model() {
    let registry = default_registry().expect("built-in models register");
    let descriptor = registry.lookup(API, MODEL).expect("rescue model registered");
    assert_eq!(descriptor.api, "rdk:component:sensor");
    assert_eq!(descriptor.model, "viam:bluetooth-rescue:rescue");
}

#[test]
fn duplicate_registration_is_rejected() {
    let mut registry = default_registry().expect("built-in models register");
    let err = registry
        .register(rescue_model())
        .expect_err("already registered");
    assert_eq!(
        err,
        RegistryError::Duplicate(format!("{API}/{MODEL}"))
    );
}

#[test]
fn unknown_model_cannot_be_constructed() {
    let registry = Registry::new();
    let err = registry
        .construct(API, MODEL, "bt", RescueConfig::new(true))
        .expect_err("empty registry");
    assert!(matches!(err, RegistryError::Unknown(_)));
    assert!(registry.lookup(API, "viam:bluetooth-rescue:other").is_none());
}

#[test]
fn constructor_errors_pass_through() {
    let mut registry = Registry::new();
    registry
        .register(ModelDescriptor {
            api: API,
            model: "test:refuse",
            constructor: refuse,
        })
        .expect("fresh key");

    let err = registry
        .construct(API, "test:refuse", "bt", RescueConfig::new(true))
        .expect_err("constructor refuses");
    assert!(matches!(err, RegistryError::Config(ConfigError { field: "rescue", .. })));
}

#[test]
fn invalid_config_is_rejected_before_starting() {
    let registry = default_registry().expect("built-in models register");
    let mut config = RescueConfig::new(true);
    config.recovery.kernel_module = "../hci_uart".to_owned();

    let err = registry
        .construct(API, MODEL, "bt", config)
        .expect_err("module name is invalid");
    assert!(matches!(
        err,
        RegistryError::Config(ConfigError {
            field: "recovery.kernel_module",
            ..
        })
    ));
}

#[test]
fn default_registry_matches_manual_registration() {
    let mut manual = Registry::new();
    manual.register(rescue_model()).expect("fresh key");

    let registry = default_registry().expect("built-in models register");
    assert_eq!(
        registry.lookup(API, MODEL).map(|d| (d.api, d.model)),
        manual.lookup(API, MODEL).map(|d| (d.api, d.model))
    );
    assert!(matches!(
        manual.register(rescue_model()),
        Err(RegistryError::Duplicate(_))
    ));
}
