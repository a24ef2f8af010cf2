//! # cmkit - Configuration-Management Dispatch
//!
//! Routes node and infrastructure lifecycle operations to pluggable
//! configuration-management backends (Chef, Puppet, Puppet-Solo, dummy).
//!
//! ## Pieces
//!
//! - **Registry**: protocol identifier → [`BackendPlugin`], built once at
//!   process start and shared read-only afterwards.
//! - **Schema check**: every backend record is validated against its
//!   backend's required/optional key sets before construction.
//! - **Command**: backends plan a [`Command`] (`cri_*`) which is then
//!   performed against the same instance.
//! - **Dispatcher**: [`ConfigManager`] resolves the backend for a node or an
//!   infrastructure, builds it and runs the command.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use cmkit::{ConfigManager, InMemoryInfoBroker, RegistryBuilder, StaticCredentialStore};
//!
//! let registry = Arc::new(RegistryBuilder::new().build()?);
//! let cm = ConfigManager::new(
//!     registry,
//!     Arc::new(StaticCredentialStore::default()),
//!     Arc::new(InMemoryInfoBroker::new()),
//! );
//! cm.register_node(&definition)?;
//! ```

pub mod backends;
pub mod broker;
pub mod command;
pub mod contracts;
pub mod dispatcher;
pub mod error;
pub mod model;
pub mod registry;
pub mod schema;
pub mod state;

pub use backends::{DummyConfigManager, DummyPlugin, DUMMY_ATTRIBUTE};
pub use broker::{CredentialEntry, InMemoryInfoBroker, StaticCredentialStore};
pub use command::{Command, ConfigManagerBackend, OperationKind, OperationOutcome, OperationRequest};
pub use contracts::{CredentialStore, InfoBroker, NodeInstances, StateProvider};
pub use dispatcher::{
    ConfigManager, ConfigManagerStateProvider, DispatcherOptions, InfraBackendSource,
    CONFIG_MANAGEMENT_PURPOSE,
};
pub use error::{CmError, CmResult};
pub use model::{AttributePath, AuthData, BackendRecord, InstanceData, ResolvedNodeDefinition};
pub use registry::{BackendPlugin, BackendRegistry, RegistryBuilder, RegistryError};
pub use schema::{SchemaError, SchemaSpec};
pub use state::NodeState;
