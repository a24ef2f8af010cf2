//! Backend registry: protocol identifier → backend plugin.
//!
//! Plugins are fed into a [`RegistryBuilder`] by an explicit registration
//! step at process start. The finished [`BackendRegistry`] is immutable and
//! shared read-only between dispatch calls.
use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;

use crate::backends::DummyPlugin;
use crate::command::ConfigManagerBackend;
use crate::error::{CmError, CmResult};
use crate::model::{AuthData, BackendRecord};
use crate::schema::{SchemaError, SchemaSpec};

/// Constructor and metadata for one backend type.
pub trait BackendPlugin: Send + Sync {
    /// Protocol identifier matched against a record's `type` key.
    fn protocol(&self) -> &'static str;

    /// Key sets checked before construction. `None` accepts any record.
    fn schema(&self) -> Option<SchemaSpec> {
        None
    }

    /// Whether the dispatcher must fetch credentials before construction.
    fn requires_credentials(&self) -> bool {
        true
    }

    /// Build a fresh instance. Must be deterministic for equal inputs.
    fn instantiate(
        &self,
        record: &BackendRecord,
        auth: Option<AuthData>,
    ) -> CmResult<Box<dyn ConfigManagerBackend>>;
}

/// The final, read-only registry.
pub struct BackendRegistry {
    plugins: BTreeMap<&'static str, Arc<dyn BackendPlugin>>,
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("protocols", &self.protocols())
            .finish()
    }
}

impl BackendRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Registered protocol identifiers, sorted.
    pub fn protocols(&self) -> Vec<&'static str> {
        self.plugins.keys().copied().collect()
    }

    pub fn contains(&self, protocol: &str) -> bool {
        self.plugins.contains_key(protocol)
    }

    pub fn plugin(&self, protocol: &str) -> CmResult<&Arc<dyn BackendPlugin>> {
        self.plugins
            .get(protocol)
            .ok_or_else(|| CmError::unknown_backend(protocol))
    }

    /// Resolve the plugin for a record and validate the record against it.
    pub fn check(&self, record: &BackendRecord) -> CmResult<&Arc<dyn BackendPlugin>> {
        let protocol = record.protocol().ok_or_else(SchemaError::untyped)?;
        let plugin = self.plugin(protocol)?;
        if let Some(schema) = plugin.schema() {
            schema.check(protocol, record.as_map())?;
        }
        Ok(plugin)
    }

    /// Validate a record and construct a fresh backend instance from it.
    pub fn instantiate(
        &self,
        record: &BackendRecord,
        auth: Option<AuthData>,
    ) -> CmResult<Box<dyn ConfigManagerBackend>> {
        let plugin = self.check(record)?;
        tracing::debug!(backend = %record.label(), "Instantiating config-management backend");
        plugin.instantiate(record, auth)
    }
}

/// Collects plugin registrations; uniqueness enforced at build time.
pub struct RegistryBuilder {
    plugins: BTreeMap<&'static str, Arc<dyn BackendPlugin>>,
    errors: Vec<String>,
}

impl Default for RegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryBuilder {
    /// A builder with the mandatory `dummy` backend already registered.
    pub fn new() -> Self {
        let mut b = Self::empty();
        b.register(Arc::new(DummyPlugin));
        b
    }

    /// A builder with nothing registered, not even `dummy`.
    pub fn empty() -> Self {
        Self {
            plugins: BTreeMap::new(),
            errors: Vec::new(),
        }
    }

    pub fn register(&mut self, plugin: Arc<dyn BackendPlugin>) -> &mut Self {
        let protocol = plugin.protocol();
        if protocol.trim().is_empty() {
            self.errors
                .push("Backend plugin with an empty protocol identifier".to_string());
            return self;
        }
        if self.plugins.contains_key(protocol) {
            self.errors
                .push(format!("Backend '{protocol}' is already registered"));
            return self;
        }
        self.plugins.insert(protocol, plugin);
        self
    }

    pub fn build(self) -> Result<BackendRegistry, RegistryError> {
        if !self.errors.is_empty() {
            return Err(RegistryError::InvalidRegistryConfiguration {
                errors: self.errors,
            });
        }

        tracing::info!(
            backends = ?self.plugins.keys().collect::<Vec<_>>(),
            "Config-management backends registered"
        );

        Ok(BackendRegistry {
            plugins: self.plugins,
        })
    }
}

/// Structured errors for the backend registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("invalid backend registry configuration:\n{errors:#?}")]
    InvalidRegistryConfiguration { errors: Vec<String> },
}
