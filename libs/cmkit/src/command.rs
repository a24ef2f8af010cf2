//! Command protocol between the dispatcher and backend instances.
//!
//! A backend first *plans* an operation (`cri_*` factory methods return a
//! [`Command`]) and later *executes* it (`Command::perform`). Requests can be
//! inspected before anything touches a remote server.

use serde_json::Value;

use crate::error::{CmError, CmResult};
use crate::model::{AttributePath, InstanceData, ResolvedNodeDefinition};
use crate::state::NodeState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    RegisterNode,
    DropNode,
    GetNodeState,
    GetNodeAttribute,
    CreateInfrastructure,
    DropInfrastructure,
    InfrastructureExists,
    ResolveAttributes,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::RegisterNode => "register_node",
            OperationKind::DropNode => "drop_node",
            OperationKind::GetNodeState => "get_node_state",
            OperationKind::GetNodeAttribute => "get_node_attribute",
            OperationKind::CreateInfrastructure => "create_infrastructure",
            OperationKind::DropInfrastructure => "drop_infrastructure",
            OperationKind::InfrastructureExists => "infrastructure_exists",
            OperationKind::ResolveAttributes => "resolve_attributes",
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One operation together with its captured arguments.
#[derive(Debug, Clone, PartialEq)]
pub enum OperationRequest {
    RegisterNode(ResolvedNodeDefinition),
    DropNode(InstanceData),
    GetNodeState(InstanceData),
    GetNodeAttribute { node_id: String, path: AttributePath },
    CreateInfrastructure { infra_id: String },
    DropInfrastructure { infra_id: String },
    InfrastructureExists { infra_id: String },
    ResolveAttributes(ResolvedNodeDefinition),
}

impl OperationRequest {
    pub fn kind(&self) -> OperationKind {
        match self {
            OperationRequest::RegisterNode(_) => OperationKind::RegisterNode,
            OperationRequest::DropNode(_) => OperationKind::DropNode,
            OperationRequest::GetNodeState(_) => OperationKind::GetNodeState,
            OperationRequest::GetNodeAttribute { .. } => OperationKind::GetNodeAttribute,
            OperationRequest::CreateInfrastructure { .. } => OperationKind::CreateInfrastructure,
            OperationRequest::DropInfrastructure { .. } => OperationKind::DropInfrastructure,
            OperationRequest::InfrastructureExists { .. } => OperationKind::InfrastructureExists,
            OperationRequest::ResolveAttributes(_) => OperationKind::ResolveAttributes,
        }
    }
}

/// Result of executing a request.
#[derive(Debug, Clone, PartialEq)]
pub enum OperationOutcome {
    Done,
    State(NodeState),
    Attribute(Value),
    Exists(bool),
    Attributes(Value),
}

impl OperationOutcome {
    fn unexpected(self, kind: OperationKind) -> CmError {
        CmError::UnexpectedOutcome {
            operation: kind.as_str(),
            actual: format!("{self:?}"),
        }
    }

    pub fn into_done(self, kind: OperationKind) -> CmResult<()> {
        match self {
            OperationOutcome::Done => Ok(()),
            other => Err(other.unexpected(kind)),
        }
    }

    pub fn into_state(self, kind: OperationKind) -> CmResult<NodeState> {
        match self {
            OperationOutcome::State(state) => Ok(state),
            other => Err(other.unexpected(kind)),
        }
    }

    pub fn into_attribute(self, kind: OperationKind) -> CmResult<Value> {
        match self {
            OperationOutcome::Attribute(value) | OperationOutcome::Attributes(value) => Ok(value),
            other => Err(other.unexpected(kind)),
        }
    }

    pub fn into_exists(self, kind: OperationKind) -> CmResult<bool> {
        match self {
            OperationOutcome::Exists(exists) => Ok(exists),
            other => Err(other.unexpected(kind)),
        }
    }
}

/// Deferred, single-use operation bound to its arguments.
///
/// Not `Clone`: `perform` consumes it.
#[derive(Debug)]
pub struct Command {
    request: OperationRequest,
}

impl Command {
    pub fn new(request: OperationRequest) -> Self {
        Self { request }
    }

    pub fn kind(&self) -> OperationKind {
        self.request.kind()
    }

    pub fn request(&self) -> &OperationRequest {
        &self.request
    }

    pub fn into_request(self) -> OperationRequest {
        self.request
    }

    /// Execute against the backend instance that planned this command.
    pub fn perform(self, backend: &dyn ConfigManagerBackend) -> CmResult<OperationOutcome> {
        tracing::trace!(
            protocol = backend.protocol(),
            operation = %self.kind(),
            "Performing config-management command"
        );
        backend.perform(self)
    }
}

/// A configured backend instance (Chef server, Puppet master, no-op, ...).
///
/// The `cri_*` methods plan a command; backends override them only when the
/// request must be shaped differently. `perform` executes it.
pub trait ConfigManagerBackend: Send + Sync {
    /// Protocol identifier the instance was registered under.
    fn protocol(&self) -> &str;

    fn cri_register_node(&self, definition: &ResolvedNodeDefinition) -> Command {
        Command::new(OperationRequest::RegisterNode(definition.clone()))
    }

    fn cri_drop_node(&self, instance: &InstanceData) -> Command {
        Command::new(OperationRequest::DropNode(instance.clone()))
    }

    fn cri_get_node_state(&self, instance: &InstanceData) -> Command {
        Command::new(OperationRequest::GetNodeState(instance.clone()))
    }

    fn cri_get_node_attribute(&self, node_id: &str, path: &AttributePath) -> Command {
        Command::new(OperationRequest::GetNodeAttribute {
            node_id: node_id.to_string(),
            path: path.clone(),
        })
    }

    fn cri_create_infrastructure(&self, infra_id: &str) -> Command {
        Command::new(OperationRequest::CreateInfrastructure {
            infra_id: infra_id.to_string(),
        })
    }

    fn cri_drop_infrastructure(&self, infra_id: &str) -> Command {
        Command::new(OperationRequest::DropInfrastructure {
            infra_id: infra_id.to_string(),
        })
    }

    fn cri_infrastructure_exists(&self, infra_id: &str) -> Command {
        Command::new(OperationRequest::InfrastructureExists {
            infra_id: infra_id.to_string(),
        })
    }

    fn cri_resolve_attributes(&self, definition: &ResolvedNodeDefinition) -> Command {
        Command::new(OperationRequest::ResolveAttributes(definition.clone()))
    }

    fn perform(&self, command: Command) -> CmResult<OperationOutcome>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    impl ConfigManagerBackend for Echo {
        fn protocol(&self) -> &str {
            "echo"
        }

        fn perform(&self, command: Command) -> CmResult<OperationOutcome> {
            match command.into_request() {
                OperationRequest::InfrastructureExists { infra_id } => {
                    Ok(OperationOutcome::Exists(infra_id == "known"))
                }
                _ => Ok(OperationOutcome::Done),
            }
        }
    }

    #[test]
    fn test_plan_then_execute() {
        let backend = Echo;
        let cmd = backend.cri_infrastructure_exists("known");
        assert_eq!(
            cmd.request(),
            &OperationRequest::InfrastructureExists {
                infra_id: "known".into()
            }
        );
        let outcome = cmd.perform(&backend).unwrap();
        assert_eq!(outcome, OperationOutcome::Exists(true));
    }

    #[test]
    fn test_attribute_request_is_normalized() {
        let backend = Echo;
        let a = backend.cri_get_node_attribute("n1", &AttributePath::from("a.b"));
        let b = backend.cri_get_node_attribute("n1", &AttributePath::from(["a", "b"]));
        assert_eq!(a.request(), b.request());
        assert_eq!(a.kind(), OperationKind::GetNodeAttribute);
    }

    #[test]
    fn test_outcome_shape_mismatch() {
        let err = OperationOutcome::Done
            .into_state(OperationKind::GetNodeState)
            .unwrap_err();
        assert!(matches!(err, CmError::UnexpectedOutcome { operation: "get_node_state", .. }));
        assert!(OperationOutcome::Exists(false)
            .into_exists(OperationKind::InfrastructureExists)
            .is_ok());
    }
}
