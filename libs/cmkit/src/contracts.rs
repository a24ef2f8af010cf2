//! Collaborator contracts consumed or exposed by the dispatcher.

use std::collections::BTreeMap;

use crate::error::CmResult;
use crate::model::{AuthData, BackendRecord, InstanceData};
use crate::state::NodeState;

/// Instances of one infrastructure: node name → instance id → instance.
pub type NodeInstances = BTreeMap<String, BTreeMap<String, InstanceData>>;

/// Backend credential lookup.
pub trait CredentialStore: Send + Sync {
    /// Fails with `CmError::CredentialsNotFound` when nothing matches.
    fn get(&self, purpose: &str, record: &BackendRecord) -> CmResult<AuthData>;
}

/// Information broker queries used by the dispatcher.
pub trait InfoBroker: Send + Sync {
    /// `config_managers`: ordered backend records of an infrastructure.
    fn config_managers(&self, infra_id: &str) -> CmResult<Vec<BackendRecord>>;

    /// `infrastructure.node_instances`: every provisioned instance.
    fn node_instances(&self, infra_id: &str, refresh: bool) -> CmResult<NodeInstances>;

    /// `node.find_one`: the instance record of a node.
    fn find_node(&self, node_id: &str) -> CmResult<InstanceData>;
}

/// `node.service.state` capability exposed to the rest of the orchestrator.
pub trait StateProvider: Send + Sync {
    fn service_status(&self, instance: &InstanceData) -> CmResult<NodeState>;
}
