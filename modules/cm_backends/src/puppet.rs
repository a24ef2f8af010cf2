//! Puppet master backend.
//!
//! Operations do not reach the master yet; results are constant.

use cmkit::{
    AuthData, BackendPlugin, BackendRecord, CmError, CmResult, Command, ConfigManagerBackend,
    NodeState, OperationOutcome, OperationRequest, SchemaSpec, DUMMY_ATTRIBUTE,
};
use serde_json::Value;

use crate::descriptor::BackendSpec;

pub const PROTOCOL_ID: &str = "puppet";

pub const SCHEMA: SchemaSpec =
    SchemaSpec::new(&["type", "endpoint"], &["manifests", "modules", "variables"]);

pub struct PuppetPlugin;

impl BackendPlugin for PuppetPlugin {
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
        match BackendSpec::from_record(record)? {
            BackendSpec::Puppet { endpoint, .. } => {
                tracing::debug!(endpoint = %endpoint, "Puppet config manager initialised");
                Ok(Box::new(PuppetConfigManager {
                    endpoint,
                    auth: auth.unwrap_or_default(),
                }))
            }
            other => Err(CmError::InvalidDescriptor {
                protocol: PROTOCOL_ID.to_string(),
                message: format!("expected a puppet record, got '{}'", other.protocol()),
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PuppetConfigManager {
    endpoint: String,
    auth: AuthData,
}

impl PuppetConfigManager {
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn auth(&self) -> &AuthData {
        &self.auth
    }
}

/// Shared by the Puppet flavours; `resolve_attributes` is handled by callers.
pub(crate) fn constant_outcome(protocol: &str, request: OperationRequest) -> CmResult<OperationOutcome> {
    match request {
        OperationRequest::RegisterNode(_)
        | OperationRequest::DropNode(_)
        | OperationRequest::CreateInfrastructure { .. }
        | OperationRequest::DropInfrastructure { .. } => Ok(OperationOutcome::Done),
        OperationRequest::GetNodeState(_) => Ok(OperationOutcome::State(NodeState::Ready)),
        OperationRequest::GetNodeAttribute { .. } => {
            Ok(OperationOutcome::Attribute(Value::from(DUMMY_ATTRIBUTE)))
        }
        OperationRequest::InfrastructureExists { .. } => Ok(OperationOutcome::Exists(true)),
        OperationRequest::ResolveAttributes(_) => Err(CmError::Unsupported {
            protocol: protocol.to_string(),
            operation: "resolve_attributes",
        }),
    }
}

impl ConfigManagerBackend for PuppetConfigManager {
    fn protocol(&self) -> &str {
        PROTOCOL_ID
    }

    fn perform(&self, command: Command) -> CmResult<OperationOutcome> {
        constant_outcome(PROTOCOL_ID, command.into_request())
    }
}
