//! Datasource plugins and the registry that starts them by type.

use super::spec::ObjectSpec;
use crate::errors::DatasourceError;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;

/// A datasource plugin instance.
///
/// One instance is started per declaration. `configure` receives the decoded
/// body with unknown values already replaced by placeholders.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Datasource: Send + Sync {
    /// Schema of the configuration body.
    fn config_spec(&self) -> ObjectSpec;

    /// Schema of the value `execute` returns.
    fn output_spec(&self) -> ObjectSpec;

    /// Validates and stores the configuration.
    async fn configure(&mut self, config: serde_json::Value) -> Result<(), DatasourceError>;

    /// Computes the value.
    async fn execute(&self) -> Result<serde_json::Value, DatasourceError>;
}

/// Factory function type for starting plugins.
pub type DatasourceFactory = Box<dyn Fn() -> Result<Box<dyn Datasource>, DatasourceError> + Send + Sync>;

/// Registry of datasource factories, keyed by type.
#[derive(Default)]
pub struct DatasourceRegistry {
    factories: RwLock<HashMap<String, DatasourceFactory>>,
}

impl DatasourceRegistry {
    /// Creates a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a factory for `kind`, replacing any previous one.
    pub fn register<F>(&self, kind: impl Into<String>, factory: F)
    where
        F: Fn() -> Result<Box<dyn Datasource>, DatasourceError> + Send + Sync + 'static,
    {
        self.factories.write().insert(kind.into(), Box::new(factory));
    }

    /// Returns true if `kind` is registered.
    #[must_use]
    pub fn has(&self, kind: &str) -> bool {
        self.factories.read().contains_key(kind)
    }

    /// Returns the registered types, sorted.
    #[must_use]
    pub fn list(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.factories.read().keys().cloned().collect();
        kinds.sort();
        kinds
    }

    /// Starts a fresh plugin instance.
    ///
    /// # Errors
    ///
    /// Returns an error if `kind` is not registered or its factory fails.
    pub fn start(&self, kind: &str) -> Result<Box<dyn Datasource>, DatasourceError> {
        let factories = self.factories.read();
        let factory = factories
            .get(kind)
            .ok_or_else(|| DatasourceError::new(format!("Unknown data source type {kind}")))?;
        factory()
    }
}

impl fmt::Debug for DatasourceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatasourceRegistry")
            .field("kinds", &self.list())
            .finish()
    }
}
