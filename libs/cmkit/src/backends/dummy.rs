//! No-op backend.
//!
//! Contract: every mutation succeeds without side effects, node state is
//! always [`NodeState::Ready`] (also after `drop_node`), attributes resolve to
//! [`DUMMY_ATTRIBUTE`], infrastructures always exist and attribute
//! resolution yields an empty mapping.

use serde_json::{Map, Value};

use crate::command::{Command, ConfigManagerBackend, OperationOutcome, OperationRequest};
use crate::error::CmResult;
use crate::model::{AuthData, BackendRecord};
use crate::registry::BackendPlugin;
use crate::state::NodeState;

pub const PROTOCOL_ID: &str = "dummy";

/// Value returned for every attribute lookup.
pub const DUMMY_ATTRIBUTE: &str = "dummy attribute";

pub struct DummyPlugin;

impl BackendPlugin for DummyPlugin {
    fn protocol(&self) -> &'static str {
        PROTOCOL_ID
    }

    fn requires_credentials(&self) -> bool {
        false
    }

    fn instantiate(
        &self,
        record: &BackendRecord,
        _auth: Option<AuthData>,
    ) -> CmResult<Box<dyn ConfigManagerBackend>> {
        let name = record
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or(PROTOCOL_ID);
        Ok(Box::new(DummyConfigManager::new(name)))
    }
}

#[derive(Debug, Clone)]
pub struct DummyConfigManager {
    name: String,
}

impl DummyConfigManager {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl ConfigManagerBackend for DummyConfigManager {
    fn protocol(&self) -> &str {
        PROTOCOL_ID
    }

    fn perform(&self, command: Command) -> CmResult<OperationOutcome> {
        let outcome = match command.into_request() {
            OperationRequest::RegisterNode(def) => {
                tracing::debug!(backend = %self.name, node_id = %def.node_id, "Dummy register_node");
                OperationOutcome::Done
            }
            OperationRequest::DropNode(_)
            | OperationRequest::CreateInfrastructure { .. }
            | OperationRequest::DropInfrastructure { .. } => OperationOutcome::Done,
            OperationRequest::GetNodeState(_) => OperationOutcome::State(NodeState::Ready),
            OperationRequest::GetNodeAttribute { .. } => {
                OperationOutcome::Attribute(Value::from(DUMMY_ATTRIBUTE))
            }
            OperationRequest::InfrastructureExists { .. } => OperationOutcome::Exists(true),
            OperationRequest::ResolveAttributes(_) => {
                OperationOutcome::Attributes(Value::Object(Map::new()))
            }
        };
        Ok(outcome)
    }
}
