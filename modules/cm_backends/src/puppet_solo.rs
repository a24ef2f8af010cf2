//! Masterless Puppet backend.
//!
//! Node operations are constant like [`crate::puppet`]; the useful part is
//! `resolve_attributes`, which renders the descriptor's module, manifest and
//! attribute lists into the strings the node-side bootstrap consumes.

use cmkit::{
    AuthData, BackendPlugin, BackendRecord, CmError, CmResult, Command, ConfigManagerBackend,
    OperationOutcome, OperationRequest, ResolvedNodeDefinition, SchemaSpec,
};
use serde_json::{json, Value};

use crate::descriptor::BackendSpec;
use crate::puppet::constant_outcome;

pub const PROTOCOL_ID: &str = "puppet_solo";

pub const SCHEMA: SchemaSpec = SchemaSpec::new(&["type", "manifests"], &["modules", "attributes"]);

pub struct PuppetSoloPlugin;

impl BackendPlugin for PuppetSoloPlugin {
    fn protocol(&self) -> &'static str {
        PROTOCOL_ID
    }

    fn schema(&self) -> Option<SchemaSpec> {
        Some(SCHEMA)
    }

    /// Masterless: manifests ship with the node and there is no server to
    /// authenticate against.
    fn requires_credentials(&self) -> bool {
        false
    }

    fn instantiate(
        &self,
        record: &BackendRecord,
        _auth: Option<AuthData>,
    ) -> CmResult<Box<dyn ConfigManagerBackend>> {
        match BackendSpec::from_record(record)? {
            BackendSpec::PuppetSolo { .. } => Ok(Box::new(PuppetSoloConfigManager)),
            other => Err(CmError::InvalidDescriptor {
                protocol: PROTOCOL_ID.to_string(),
                message: format!("expected a puppet_solo record, got '{}'", other.protocol()),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PuppetSoloConfigManager;

impl PuppetSoloConfigManager {
    /// `{"puppet": {"modules", "manifests", "attributes"}}` from the node's
    /// `config_management` section.
    pub fn resolve(definition: &ResolvedNodeDefinition) -> Value {
        let section = definition.backend_record();
        let render = |key: &str| {
            let rendered = section.get(key).map(space_joined).unwrap_or_default();
            tracing::debug!(key, value = %rendered, "Puppet solo attribute string");
            rendered
        };
        json!({
            "puppet": {
                "modules": render("modules"),
                "manifests": render("manifests"),
                "attributes": render("attributes"),
            }
        })
    }
}

/// Mapping keys or sequence items joined by single spaces.
fn space_joined(value: &Value) -> String {
    let item = |v: &Value| match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    match value {
        Value::Object(map) => map.keys().cloned().collect::<Vec<_>>().join(" "),
        Value::Array(items) => items.iter().map(item).collect::<Vec<_>>().join(" "),
        Value::Null => String::new(),
        scalar => item(scalar),
    }
}

impl ConfigManagerBackend for PuppetSoloConfigManager {
    fn protocol(&self) -> &str {
        PROTOCOL_ID
    }

    fn perform(&self, command: Command) -> CmResult<OperationOutcome> {
        match command.into_request() {
            OperationRequest::ResolveAttributes(def) => {
                Ok(OperationOutcome::Attributes(Self::resolve(&def)))
            }
            other => constant_outcome(PROTOCOL_ID, other),
        }
    }
}
