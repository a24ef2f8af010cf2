//! Process-local Chef server for mock runs and tests.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use cmkit::model::set_dotted;
use cmkit::{CmError, CmResult};
use parking_lot::Mutex;
use serde_json::Value;

use super::{ChefApi, ChefAuth, ChefConnector, ChefNode, OHAI_TIME, PROTOCOL_ID};

#[derive(Debug, Default)]
struct ServerState {
    environments: BTreeSet<String>,
    roles: BTreeSet<String>,
    nodes: BTreeMap<String, ChefNode>,
    // (endpoint, client_name) of every connect call, in order.
    connections: Vec<(String, String)>,
    read_only: bool,
}

/// Clones share the same server.
#[derive(Debug, Clone, Default)]
pub struct InMemoryChefServer {
    state: Arc<Mutex<ServerState>>,
}

impl InMemoryChefServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every write with a backend error.
    pub fn set_read_only(&self, read_only: bool) {
        self.state.lock().read_only = read_only;
    }

    /// Simulate a chef-client run on the node: stamps `ohai_time` and merges
    /// the given automatic attributes.
    pub fn converge(&self, node_name: &str, automatic: &[(&str, Value)]) -> CmResult<()> {
        let mut state = self.state.lock();
        let node = state
            .nodes
            .get_mut(node_name)
            .ok_or_else(|| CmError::remote_not_found("node", node_name))?;
        let now = chrono::Utc::now().timestamp_millis() as f64 / 1000.0;
        node.automatic.insert(OHAI_TIME.to_string(), Value::from(now));
        for (key, value) in automatic {
            set_dotted(&mut node.automatic, key, value.clone());
        }
        Ok(())
    }

    pub fn node(&self, name: &str) -> Option<ChefNode> {
        self.state.lock().nodes.get(name).cloned()
    }

    pub fn roles(&self) -> Vec<String> {
        self.state.lock().roles.iter().cloned().collect()
    }

    pub fn environments(&self) -> Vec<String> {
        self.state.lock().environments.iter().cloned().collect()
    }

    pub fn connections(&self) -> Vec<(String, String)> {
        self.state.lock().connections.clone()
    }

    fn write<R>(&self, op: &str, f: impl FnOnce(&mut ServerState) -> CmResult<R>) -> CmResult<R> {
        let mut state = self.state.lock();
        if state.read_only {
            return Err(CmError::backend(
                PROTOCOL_ID,
                anyhow::anyhow!("{op} rejected: server is read-only"),
            ));
        }
        f(&mut state)
    }
}

fn remove(set: &mut BTreeSet<String>, kind: &'static str, name: &str) -> CmResult<()> {
    if set.remove(name) {
        Ok(())
    } else {
        Err(CmError::remote_not_found(kind, name))
    }
}

impl ChefApi for InMemoryChefServer {
    fn list_environments(&self) -> CmResult<Vec<String>> {
        Ok(self.environments())
    }

    fn save_environment(&self, name: &str) -> CmResult<()> {
        self.write("save_environment", |s| {
            s.environments.insert(name.to_string());
            Ok(())
        })
    }

    fn delete_environment(&self, name: &str) -> CmResult<()> {
        self.write("delete_environment", |s| {
            remove(&mut s.environments, "environment", name)
        })
    }

    fn list_roles(&self) -> CmResult<Vec<String>> {
        Ok(self.roles())
    }

    fn save_role(&self, name: &str) -> CmResult<()> {
        self.write("save_role", |s| {
            s.roles.insert(name.to_string());
            Ok(())
        })
    }

    fn delete_role(&self, name: &str) -> CmResult<()> {
        self.write("delete_role", |s| remove(&mut s.roles, "role", name))
    }

    fn get_node(&self, name: &str) -> CmResult<Option<ChefNode>> {
        Ok(self.node(name))
    }

    fn save_node(&self, node: &ChefNode) -> CmResult<()> {
        self.write("save_node", |s| {
            s.nodes.insert(node.name.clone(), node.clone());
            Ok(())
        })
    }

    fn delete_node(&self, name: &str) -> CmResult<()> {
        self.write("delete_node", |s| {
            s.nodes
                .remove(name)
                .map(|_| ())
                .ok_or_else(|| CmError::remote_not_found("node", name))
        })
    }
}

impl ChefConnector for InMemoryChefServer {
    fn connect(&self, endpoint: &str, auth: &ChefAuth) -> CmResult<Arc<dyn ChefApi>> {
        self.state
            .lock()
            .connections
            .push((endpoint.to_string(), auth.client_name.clone()));
        Ok(Arc::new(self.clone()))
    }
}
