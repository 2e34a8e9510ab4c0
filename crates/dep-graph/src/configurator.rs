//! Configurator contract (spec §4.A).
//!
//! A Configurator is how the engine reaches the outside world: one is
//! registered per item type, and the engine calls into it strictly in
//! dependency order. Configurators never talk to each other or to the
//! engine's internals directly -- everything they need about dependencies
//! comes back out through `depends_on`.

use thiserror::Error;

use crate::dependency::Dependency;
use crate::item::ItemValue;

#[derive(Debug, Error)]
#[error("{0}")]
pub struct ConfiguratorError(pub String);

impl ConfiguratorError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

pub type ConfiguratorResult<T> = Result<T, ConfiguratorError>;

/// Capability set a registered item type must provide (spec §4.A, §9).
pub trait Configurator: Send + Sync {
    fn create(&self, name: &str, value: &dyn ItemValue) -> ConfiguratorResult<()>;
    fn modify(&self, name: &str, old: &dyn ItemValue, new: &dyn ItemValue) -> ConfiguratorResult<()>;
    fn delete(&self, name: &str, value: &dyn ItemValue) -> ConfiguratorResult<()>;

    /// Whether moving from `old` to `new` cannot be expressed as a Modify
    /// and must instead be torn down and rebuilt. Default: never.
    fn needs_recreate(&self, _old: &dyn ItemValue, _new: &dyn ItemValue) -> bool {
        false
    }

    /// Dependencies this item's value implies, re-derived whenever the
    /// value changes (spec §4.A "edges must be refreshed").
    fn depends_on(&self, _name: &str, _value: &dyn ItemValue) -> Vec<Dependency> {
        Vec::new()
    }
}
