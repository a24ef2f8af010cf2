//! Chef backend.
//!
//! Nodes map to Chef nodes named by `node_id` in the environment named by
//! `infra_id`. Every node gets a role `{infra_id}_{name}`; dropping the
//! infrastructure removes those roles and then the environment.

pub mod memory;

use std::sync::Arc;

use cmkit::model::{get_dotted, set_dotted};
use cmkit::{
    AttributePath, AuthData, BackendPlugin, BackendRecord, CmError, CmResult, Command,
    ConfigManagerBackend, InstanceData, NodeState, OperationOutcome, OperationRequest,
    ResolvedNodeDefinition, SchemaSpec,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::descriptor::BackendSpec;

pub use memory::InMemoryChefServer;

pub const PROTOCOL_ID: &str = "chef";

/// Recipe every registered node runs first to report back.
pub const BOOTSTRAP_RECIPE: &str = "recipe[connect]";

/// Automatic attribute present once chef-client has run on the node.
pub const OHAI_TIME: &str = "ohai_time";

pub const SCHEMA: SchemaSpec = SchemaSpec::new(&["type", "endpoint", "run_list"], &[]);

/// Client credentials for a Chef server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChefAuth {
    pub client_name: String,
    pub client_key: String,
}

impl ChefAuth {
    pub fn from_auth_data(auth: &AuthData) -> CmResult<Self> {
        serde_json::from_value(auth.0.clone()).map_err(|e| CmError::InvalidDescriptor {
            protocol: PROTOCOL_ID.to_string(),
            message: format!("auth_data: {e}"),
        })
    }
}

/// Node object as stored on the Chef server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChefNode {
    pub name: String,
    pub chef_environment: String,
    #[serde(default)]
    pub run_list: Vec<String>,
    #[serde(default)]
    pub normal: Map<String, Value>,
    #[serde(default)]
    pub automatic: Map<String, Value>,
}

impl ChefNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            chef_environment: "_default".to_string(),
            ..Self::default()
        }
    }

    /// Automatic attributes take precedence over normal ones.
    pub fn attribute(&self, path: &AttributePath) -> Option<&Value> {
        get_dotted(&self.automatic, path).or_else(|| get_dotted(&self.normal, path))
    }
}

/// The subset of the Chef server API the backend needs.
///
/// Deleting an absent object fails with `CmError::RemoteNotFound`.
pub trait ChefApi: Send + Sync {
    fn list_environments(&self) -> CmResult<Vec<String>>;
    fn save_environment(&self, name: &str) -> CmResult<()>;
    fn delete_environment(&self, name: &str) -> CmResult<()>;

    fn list_roles(&self) -> CmResult<Vec<String>>;
    fn save_role(&self, name: &str) -> CmResult<()>;
    fn delete_role(&self, name: &str) -> CmResult<()>;

    fn get_node(&self, name: &str) -> CmResult<Option<ChefNode>>;
    /// Create or replace.
    fn save_node(&self, node: &ChefNode) -> CmResult<()>;
    fn delete_node(&self, name: &str) -> CmResult<()>;
}

/// Opens authenticated API clients.
pub trait ChefConnector: Send + Sync {
    fn connect(&self, endpoint: &str, auth: &ChefAuth) -> CmResult<Arc<dyn ChefApi>>;
}

/// Connector used when no Chef client is wired in; every connect fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoChefClient;

impl ChefConnector for NoChefClient {
    fn connect(&self, endpoint: &str, _auth: &ChefAuth) -> CmResult<Arc<dyn ChefApi>> {
        Err(CmError::backend(
            PROTOCOL_ID,
            anyhow::anyhow!("no Chef API client available for '{endpoint}'"),
        ))
    }
}

pub struct ChefPlugin {
    connector: Arc<dyn ChefConnector>,
}

impl ChefPlugin {
    pub fn new(connector: Arc<dyn ChefConnector>) -> Self {
        Self { connector }
    }
}

impl BackendPlugin for ChefPlugin {
    fn protocol(&self) -> &'static str {
        PROTOCOL_ID
    }

    fn schema(&self) -> Option<SchemaSpec> {
        Some(SCHEMA)
    }

    fn instantiate(
        &self,
        record: &BackendRecord,
        auth: Option<AuthData>,
    ) -> CmResult<Box<dyn ConfigManagerBackend>> {
        let BackendSpec::Chef { endpoint, run_list } = BackendSpec::from_record(record)? else {
            return Err(CmError::InvalidDescriptor {
                protocol: PROTOCOL_ID.to_string(),
                message: "record is not a Chef descriptor".to_string(),
            });
        };
        let auth = auth.ok_or_else(|| CmError::CredentialsNotFound {
            purpose: cmkit::CONFIG_MANAGEMENT_PURPOSE.to_string(),
            protocol: PROTOCOL_ID.to_string(),
            endpoint: endpoint.clone(),
        })?;
        let auth = ChefAuth::from_auth_data(&auth)?;
        let api = self.connector.connect(&endpoint, &auth)?;
        debug!(endpoint = %endpoint, client = %auth.client_name, "Connected to Chef server");
        Ok(Box::new(ChefConfigManager::new(endpoint, run_list, api)))
    }
}

pub struct ChefConfigManager {
    endpoint: String,
    run_list: Vec<String>,
    api: Arc<dyn ChefApi>,
}

impl ChefConfigManager {
    pub fn new(endpoint: impl Into<String>, run_list: Vec<String>, api: Arc<dyn ChefApi>) -> Self {
        Self {
            endpoint: endpoint.into(),
            run_list,
            api,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn role_name(definition: &ResolvedNodeDefinition) -> String {
        format!("{}_{}", definition.infra_id, definition.name)
    }

    /// Descriptor run list with the node role and bootstrap recipe in front.
    pub fn assemble_run_list(&self, definition: &ResolvedNodeDefinition) -> Vec<String> {
        let mut run_list = self.run_list.clone();
        cond_prepend(&mut run_list, BOOTSTRAP_RECIPE.to_string());
        cond_prepend(&mut run_list, format!("role[{}]", Self::role_name(definition)));
        run_list
    }

    fn ensure_role(&self, role: &str) -> CmResult<()> {
        if self.api.list_roles()?.iter().any(|r| r == role) {
            debug!(role, "Role already exists");
            return Ok(());
        }
        info!(role, "Registering role");
        self.api.save_role(role)
    }

    fn register_node(&self, definition: &ResolvedNodeDefinition) -> CmResult<()> {
        info!(node = %definition.name, node_id = %definition.node_id, "Registering Chef node");
        self.ensure_role(&Self::role_name(definition))?;

        let mut node = self
            .api
            .get_node(&definition.node_id)?
            .unwrap_or_else(|| ChefNode::new(&definition.node_id));
        node.chef_environment = definition.infra_id.clone();
        node.run_list = self.assemble_run_list(definition);
        for (key, value) in &definition.attributes {
            set_dotted(&mut node.normal, key, value.clone());
        }
        self.api.save_node(&node)
    }

    fn drop_node(&self, instance: &InstanceData) {
        debug!(node_id = %instance.node_id, "Dropping Chef node");
        if let Err(e) = self.api.delete_node(&instance.node_id) {
            warn!(node_id = %instance.node_id, error = %e, "Dropping node failed - ignoring");
        }
    }

    fn node_state(&self, instance: &InstanceData) -> CmResult<NodeState> {
        let state = match self.api.get_node(&instance.node_id)? {
            None => NodeState::Unknown,
            Some(node) if node.automatic.contains_key(OHAI_TIME) => NodeState::Ready,
            Some(_) => NodeState::Pending,
        };
        Ok(state)
    }

    fn node_attribute(&self, node_id: &str, path: &AttributePath) -> CmResult<Value> {
        let node = self
            .api
            .get_node(node_id)?
            .ok_or_else(|| CmError::remote_not_found("node", node_id))?;
        node.attribute(path)
            .cloned()
            .ok_or_else(|| CmError::AttributeNotFound {
                node_id: node_id.to_string(),
                path: path.dotted(),
            })
    }

    fn drop_infrastructure(&self, infra_id: &str) -> CmResult<()> {
        let prefix = format!("{infra_id}_");
        for role in self.api.list_roles()? {
            if !role.starts_with(&prefix) {
                continue;
            }
            debug!(role = %role, "Removing role");
            if let Err(e) = self.api.delete_role(&role) {
                warn!(role = %role, error = %e, "Removing role failed - ignoring");
            }
        }

        debug!(infra_id, "Dropping environment");
        if let Err(e) = self.api.delete_environment(infra_id) {
            warn!(infra_id, error = %e, "Dropping environment failed - ignoring");
        }
        Ok(())
    }
}

impl ConfigManagerBackend for ChefConfigManager {
    fn protocol(&self) -> &str {
        PROTOCOL_ID
    }

    fn perform(&self, command: Command) -> CmResult<OperationOutcome> {
        match command.into_request() {
            OperationRequest::RegisterNode(def) => {
                self.register_node(&def).map(|()| OperationOutcome::Done)
            }
            OperationRequest::DropNode(inst) => {
                self.drop_node(&inst);
                Ok(OperationOutcome::Done)
            }
            OperationRequest::GetNodeState(inst) => self.node_state(&inst).map(OperationOutcome::State),
            OperationRequest::GetNodeAttribute { node_id, path } => {
                self.node_attribute(&node_id, &path).map(OperationOutcome::Attribute)
            }
            OperationRequest::CreateInfrastructure { infra_id } => {
                debug!(infra_id = %infra_id, "Creating environment");
                self.api
                    .save_environment(&infra_id)
                    .map(|()| OperationOutcome::Done)
            }
            OperationRequest::DropInfrastructure { infra_id } => self
                .drop_infrastructure(&infra_id)
                .map(|()| OperationOutcome::Done),
            OperationRequest::InfrastructureExists { infra_id } => {
                let environments = self.api.list_environments()?;
                Ok(OperationOutcome::Exists(environments.contains(&infra_id)))
            }
            OperationRequest::ResolveAttributes(_) => Err(CmError::Unsupported {
                protocol: PROTOCOL_ID.to_string(),
                operation: "resolve_attributes",
            }),
        }
    }
}

fn cond_prepend(list: &mut Vec<String>, item: String) {
    if !list.contains(&item) {
        list.insert(0, item);
    }
}
