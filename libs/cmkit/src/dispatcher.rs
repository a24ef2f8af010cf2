//! Config Manager dispatcher.
//!
//! Every public operation follows the same shape: resolve the backend record,
//! build a fresh backend instance, let it plan a [`Command`], perform it.
//! Infrastructure operations fan out over every distinct backend of the
//! infrastructure, sequentially and in list order.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::command::{Command, ConfigManagerBackend, OperationKind, OperationOutcome};
use crate::contracts::{CredentialStore, InfoBroker, StateProvider};
use crate::error::{CmError, CmResult};
use crate::model::{AttributePath, BackendRecord, InstanceData, ResolvedNodeDefinition};
use crate::registry::BackendRegistry;
use crate::state::NodeState;

/// Purpose under which backend credentials are requested.
pub const CONFIG_MANAGEMENT_PURPOSE: &str = "config_management";

/// Where an infrastructure's backend set comes from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InfraBackendSource {
    /// `config_managers` list from the information broker, cached per
    /// infrastructure for the dispatcher's lifetime.
    #[default]
    Broker,
    /// Scan of the infrastructure's provisioned instances, on every call.
    Instances,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DispatcherOptions {
    pub credential_purpose: String,
    pub infra_backend_source: InfraBackendSource,
}

impl Default for DispatcherOptions {
    fn default() -> Self {
        Self {
            credential_purpose: CONFIG_MANAGEMENT_PURPOSE.to_string(),
            infra_backend_source: InfraBackendSource::default(),
        }
    }
}

/// Facade the orchestrator calls for configuration-management lifecycle
/// operations.
type CacheCell = Mutex<Option<Arc<Vec<BackendRecord>>>>;

pub struct ConfigManager {
    registry: Arc<BackendRegistry>,
    credentials: Arc<dyn CredentialStore>,
    info_broker: Arc<dyn InfoBroker>,
    options: DispatcherOptions,
    // infra_id -> distinct backend records; populated at most once per infra.
    config_managers: DashMap<String, Arc<CacheCell>>,
}

impl std::fmt::Debug for ConfigManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigManager")
            .field("registry", &self.registry)
            .field("options", &self.options)
            .field("cached_infrastructures", &self.config_managers.len())
            .finish()
    }
}

impl ConfigManager {
    pub fn new(
        registry: Arc<BackendRegistry>,
        credentials: Arc<dyn CredentialStore>,
        info_broker: Arc<dyn InfoBroker>,
    ) -> Self {
        Self {
            registry,
            credentials,
            info_broker,
            options: DispatcherOptions::default(),
            config_managers: DashMap::new(),
        }
    }

    pub fn with_options(mut self, options: DispatcherOptions) -> Self {
        self.options = options;
        self
    }

    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    pub fn options(&self) -> &DispatcherOptions {
        &self.options
    }

    /// Validate a record, fetch its credentials and build a fresh instance.
    pub fn instantiate(&self, record: &BackendRecord) -> CmResult<Box<dyn ConfigManagerBackend>> {
        let plugin = self.registry.check(record)?;
        let auth = if plugin.requires_credentials() {
            Some(
                self.credentials
                    .get(&self.options.credential_purpose, record)?,
            )
        } else {
            None
        };
        plugin.instantiate(record, auth)
    }

    fn dispatch<F>(&self, record: &BackendRecord, plan: F) -> CmResult<OperationOutcome>
    where
        F: FnOnce(&dyn ConfigManagerBackend) -> Command,
    {
        let backend = self.instantiate(record)?;
        let command = plan(backend.as_ref());
        command.perform(backend.as_ref())
    }

    #[instrument(
        name = "cm.register_node",
        skip(self, definition),
        fields(node_id = %definition.node_id, infra_id = %definition.infra_id)
    )]
    pub fn register_node(&self, definition: &ResolvedNodeDefinition) -> CmResult<()> {
        let record = definition.backend_record();
        info!(node = %definition.name, backend = %record.label(), "Registering node");
        self.dispatch(&record, |cm| cm.cri_register_node(definition))?
            .into_done(OperationKind::RegisterNode)
    }

    /// Removing a node the backend no longer knows is a success.
    #[instrument(
        name = "cm.drop_node",
        skip(self, instance),
        fields(node_id = %instance.node_id, instance_id = %instance.instance_id)
    )]
    pub fn drop_node(&self, instance: &InstanceData) -> CmResult<()> {
        let record = instance.backend_record();
        match self.dispatch(&record, |cm| cm.cri_drop_node(instance)) {
            Ok(outcome) => outcome.into_done(OperationKind::DropNode),
            Err(e) if e.is_remote_not_found() => {
                info!(error = %e, "Node already absent on backend; treating drop as done");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    #[instrument(
        name = "cm.get_node_state",
        skip(self, instance),
        fields(node_id = %instance.node_id, instance_id = %instance.instance_id)
    )]
    pub fn get_node_state(&self, instance: &InstanceData) -> CmResult<NodeState> {
        let record = instance.backend_record();
        let state = match self.dispatch(&record, |cm| cm.cri_get_node_state(instance)) {
            Ok(outcome) => outcome.into_state(OperationKind::GetNodeState)?,
            Err(e) if e.is_remote_not_found() => NodeState::Unknown,
            Err(e) => return Err(e),
        };
        debug!(state = %state, "Node state resolved");
        Ok(state)
    }

    /// `attribute` may be a dotted string or a sequence of path segments.
    #[instrument(name = "cm.get_node_attribute", skip(self, attribute))]
    pub fn get_node_attribute(
        &self,
        node_id: &str,
        attribute: impl Into<AttributePath>,
    ) -> CmResult<Value> {
        let path = attribute.into();
        path.validate()?;
        let node = self.info_broker.find_node(node_id)?;
        let record = node.backend_record();
        debug!(path = %path, backend = %record.label(), "Querying node attribute");
        self.dispatch(&record, |cm| cm.cri_get_node_attribute(node_id, &path))?
            .into_attribute(OperationKind::GetNodeAttribute)
    }

    /// Backend-specific attribute bundle for a node definition.
    #[instrument(
        name = "cm.resolve_attributes",
        skip(self, definition),
        fields(node_id = %definition.node_id)
    )]
    pub fn resolve_attributes(&self, definition: &ResolvedNodeDefinition) -> CmResult<Value> {
        let record = definition.backend_record();
        self.dispatch(&record, |cm| cm.cri_resolve_attributes(definition))?
            .into_attribute(OperationKind::ResolveAttributes)
    }

    /// Stops at the first backend that fails.
    #[instrument(name = "cm.create_infrastructure", skip(self))]
    pub fn create_infrastructure(&self, infra_id: &str) -> CmResult<()> {
        let records = self.infra_backends(infra_id)?;
        debug!(backends = records.len(), "Building environments for infrastructure");
        for (position, record) in records.iter().enumerate() {
            self.dispatch(record, |cm| cm.cri_create_infrastructure(infra_id))
                .and_then(|o| o.into_done(OperationKind::CreateInfrastructure))
                .map_err(|e| fan_out_error(OperationKind::CreateInfrastructure, infra_id, position, record, e))?;
        }
        Ok(())
    }

    /// Tears down every backend. Cleanup failures are logged and skipped;
    /// a backend that cannot even be built stops the teardown.
    #[instrument(name = "cm.drop_infrastructure", skip(self))]
    pub fn drop_infrastructure(&self, infra_id: &str) -> CmResult<()> {
        let records = self.infra_backends(infra_id)?;
        debug!(backends = records.len(), "Destroying environments for infrastructure");
        for (position, record) in records.iter().enumerate() {
            let backend = self.instantiate(record).map_err(|e| {
                fan_out_error(OperationKind::DropInfrastructure, infra_id, position, record, e)
            })?;
            let result = backend
                .cri_drop_infrastructure(infra_id)
                .perform(backend.as_ref())
                .and_then(|o| o.into_done(OperationKind::DropInfrastructure));
            match result {
                Ok(()) => {}
                Err(e) if e.is_remote_not_found() => {
                    debug!(backend = %record.label(), error = %e, "Environment already absent");
                }
                Err(e) => {
                    warn!(
                        backend = %record.label(),
                        position,
                        error = %e,
                        "Dropping environment failed - ignoring"
                    );
                }
            }
        }
        Ok(())
    }

    /// True only if every backend reports ready; stops at the first that
    /// does not.
    #[instrument(name = "cm.infrastructure_exists", skip(self))]
    pub fn infrastructure_exists(&self, infra_id: &str) -> CmResult<bool> {
        let records = self.infra_backends(infra_id)?;
        for (position, record) in records.iter().enumerate() {
            let ready = self
                .dispatch(record, |cm| cm.cri_infrastructure_exists(infra_id))
                .and_then(|o| o.into_exists(OperationKind::InfrastructureExists))
                .map_err(|e| {
                    fan_out_error(OperationKind::InfrastructureExists, infra_id, position, record, e)
                })?;
            if !ready {
                debug!(backend = %record.label(), "Environment is not ready");
                return Ok(false);
            }
            debug!(backend = %record.label(), "Environment is ready");
        }
        Ok(true)
    }

    /// Distinct backend records of an infrastructure, in first-seen order.
    pub fn infra_backends(&self, infra_id: &str) -> CmResult<Arc<Vec<BackendRecord>>> {
        match self.options.infra_backend_source {
            InfraBackendSource::Broker => {
                let cell = Arc::clone(
                    self.config_managers
                        .entry(infra_id.to_string())
                        .or_default()
                        .value(),
                );
                // Only this infrastructure's cell is held across the broker call.
                let mut slot = cell.lock();
                if let Some(records) = slot.as_ref() {
                    return Ok(Arc::clone(records));
                }
                let records = Arc::new(distinct(self.info_broker.config_managers(infra_id)?));
                debug!(infra_id, backends = records.len(), "Cached config managers");
                *slot = Some(Arc::clone(&records));
                Ok(records)
            }
            InfraBackendSource::Instances => {
                let nodes = self.info_broker.node_instances(infra_id, true)?;
                let records = nodes
                    .values()
                    .flat_map(|by_id| by_id.values())
                    .map(InstanceData::backend_record);
                Ok(Arc::new(distinct(records)))
            }
        }
    }
}

fn distinct(records: impl IntoIterator<Item = BackendRecord>) -> Vec<BackendRecord> {
    let mut out: Vec<BackendRecord> = Vec::new();
    for record in records {
        if !out.contains(&record) {
            out.push(record);
        }
    }
    out
}

fn fan_out_error(
    operation: OperationKind,
    infra_id: &str,
    position: usize,
    record: &BackendRecord,
    source: CmError,
) -> CmError {
    CmError::Infrastructure {
        operation: operation.as_str(),
        infra_id: infra_id.to_string(),
        protocol: record.protocol().unwrap_or("<unset>").to_string(),
        position,
        source: Box::new(source),
    }
}

/// `node.service.state` provider backed by a dispatcher.
#[derive(Debug, Clone)]
pub struct ConfigManagerStateProvider {
    config_manager: Arc<ConfigManager>,
}

impl ConfigManagerStateProvider {
    pub fn new(config_manager: Arc<ConfigManager>) -> Self {
        Self { config_manager }
    }
}

impl StateProvider for ConfigManagerStateProvider {
    fn service_status(&self, instance: &InstanceData) -> CmResult<NodeState> {
        self.config_manager.get_node_state(instance)
    }
}
