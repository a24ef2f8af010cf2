//! In-process collaborators: a map-backed information broker and a static
//! credential store.

use std::collections::BTreeMap;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::contracts::{CredentialStore, InfoBroker, NodeInstances};
use crate::dispatcher::CONFIG_MANAGEMENT_PURPOSE;
use crate::error::{CmError, CmResult};
use crate::model::{AuthData, BackendRecord, InstanceData};

/// Information broker keeping everything in memory.
#[derive(Default)]
pub struct InMemoryInfoBroker {
    config_managers: DashMap<String, Vec<BackendRecord>>,
    instances: DashMap<String, NodeInstances>,
}

impl std::fmt::Debug for InMemoryInfoBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let infras: Vec<String> = self
            .config_managers
            .iter()
            .map(|e| e.key().clone())
            .collect();
        f.debug_struct("InMemoryInfoBroker")
            .field("infrastructures", &infras)
            .field("instance_infras", &self.instances.len())
            .finish()
    }
}

impl InMemoryInfoBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the backend list of an infrastructure.
    pub fn set_config_managers(&self, infra_id: impl Into<String>, records: Vec<BackendRecord>) {
        self.config_managers.insert(infra_id.into(), records);
    }

    /// Register or replace an instance under its infrastructure and node name.
    pub fn add_instance(&self, instance: InstanceData) {
        let infra_id = instance.infra_id().to_string();
        let node_name = instance.resolved_node_definition.name.clone();
        self.instances
            .entry(infra_id)
            .or_default()
            .entry(node_name)
            .or_default()
            .insert(instance.instance_id.clone(), instance);
    }

    pub fn remove_instance(&self, instance: &InstanceData) -> bool {
        let Some(mut nodes) = self.instances.get_mut(instance.infra_id()) else {
            return false;
        };
        let name = &instance.resolved_node_definition.name;
        let removed = nodes
            .get_mut(name)
            .map(|by_id| by_id.remove(&instance.instance_id).is_some())
            .unwrap_or(false);
        if nodes.get(name).is_some_and(BTreeMap::is_empty) {
            nodes.remove(name);
        }
        removed
    }
}

impl InfoBroker for InMemoryInfoBroker {
    fn config_managers(&self, infra_id: &str) -> CmResult<Vec<BackendRecord>> {
        self.config_managers
            .get(infra_id)
            .map(|records| records.clone())
            .ok_or_else(|| CmError::NotFound {
                key: "config_managers",
                id: infra_id.to_string(),
            })
    }

    fn node_instances(&self, infra_id: &str, _refresh: bool) -> CmResult<NodeInstances> {
        Ok(self
            .instances
            .get(infra_id)
            .map(|nodes| nodes.clone())
            .unwrap_or_default())
    }

    fn find_node(&self, node_id: &str) -> CmResult<InstanceData> {
        for infra in self.instances.iter() {
            let found = infra
                .values()
                .flat_map(BTreeMap::values)
                .find(|inst| inst.node_id == node_id);
            if let Some(inst) = found {
                return Ok(inst.clone());
            }
        }
        Err(CmError::NotFound {
            key: "node.find_one",
            id: node_id.to_string(),
        })
    }
}

/// One credential entry: matches a purpose, a backend type and optionally
/// an endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CredentialEntry {
    #[serde(default = "default_purpose")]
    pub purpose: String,
    #[serde(rename = "type")]
    pub protocol: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    pub auth_data: AuthData,
}

fn default_purpose() -> String {
    CONFIG_MANAGEMENT_PURPOSE.to_string()
}

impl CredentialEntry {
    /// Entry for the `config_management` purpose.
    pub fn new(protocol: impl Into<String>, endpoint: Option<&str>, auth_data: AuthData) -> Self {
        Self {
            purpose: default_purpose(),
            protocol: protocol.into(),
            endpoint: endpoint.map(str::to_string),
            auth_data,
        }
    }

    #[must_use]
    pub fn with_purpose(mut self, purpose: impl Into<String>) -> Self {
        self.purpose = purpose.into();
        self
    }
}

/// Credential store over a fixed list of entries.
///
/// Only entries for the requested purpose are considered. Among those an
/// entry with a matching endpoint wins over a type-only entry.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentialStore {
    entries: Vec<CredentialEntry>,
}

impl StaticCredentialStore {
    pub fn new(entries: Vec<CredentialEntry>) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl CredentialStore for StaticCredentialStore {
    fn get(&self, purpose: &str, record: &BackendRecord) -> CmResult<AuthData> {
        let protocol = record.protocol().unwrap_or_default();
        let endpoint = record.endpoint();

        let candidates = || {
            self.entries
                .iter()
                .filter(|e| e.purpose == purpose && e.protocol == protocol)
        };
        let exact = candidates().find(|e| e.endpoint.is_some() && e.endpoint.as_deref() == endpoint);
        let fallback = || candidates().find(|e| e.endpoint.is_none());

        exact
            .or_else(fallback)
            .map(|e| e.auth_data.clone())
            .ok_or_else(|| CmError::CredentialsNotFound {
                purpose: purpose.to_string(),
                protocol: protocol.to_string(),
                endpoint: endpoint.unwrap_or_default().to_string(),
            })
    }
}
