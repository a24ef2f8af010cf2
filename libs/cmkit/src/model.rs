//! Data contracts read by the dispatcher.
//!
//! Node definitions and instance records are owned by node resolution and the
//! information broker; this crate only reads them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{CmError, CmResult};

/// Raw backend record as it appears in node or infrastructure configuration,
/// e.g. `{type: "chef", endpoint: "...", run_list: [...]}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackendRecord(Map<String, Value>);

impl BackendRecord {
    /// Key carrying the protocol identifier.
    pub const TYPE_KEY: &'static str = "type";

    /// The no-op record used when a node definition names no backend.
    pub fn dummy() -> Self {
        let mut map = Map::new();
        map.insert(Self::TYPE_KEY.to_string(), Value::from("dummy"));
        Self(map)
    }

    pub fn from_value(value: Value) -> CmResult<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(CmError::InvalidDescriptor {
                protocol: "<unset>".to_string(),
                message: format!("expected a mapping, got {other}"),
            }),
        }
    }

    pub fn protocol(&self) -> Option<&str> {
        self.0.get(Self::TYPE_KEY).and_then(Value::as_str)
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.0.get("endpoint").and_then(Value::as_str)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }

    /// Short label for logs: `protocol@endpoint`.
    pub fn label(&self) -> String {
        match (self.protocol(), self.endpoint()) {
            (Some(p), Some(e)) => format!("{p}@{e}"),
            (Some(p), None) => p.to_string(),
            _ => "<untyped>".to_string(),
        }
    }
}

impl From<Map<String, Value>> for BackendRecord {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Opaque backend credentials handed out by the credential store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuthData(pub Value);

impl AuthData {
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }
}

/// Fully resolved node definition produced by node resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedNodeDefinition {
    pub node_id: String,
    pub infra_id: String,
    pub name: String,
    /// Dotted-path addressable attributes, e.g. `{"app.port": 8080}`.
    #[serde(default)]
    pub attributes: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_management: Option<BackendRecord>,
}

impl ResolvedNodeDefinition {
    pub fn new(
        node_id: impl Into<String>,
        infra_id: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            infra_id: infra_id.into(),
            name: name.into(),
            attributes: Map::new(),
            config_management: None,
        }
    }

    pub fn with_config_management(mut self, record: BackendRecord) -> Self {
        self.config_management = Some(record);
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// Backend record for this node, falling back to the dummy backend.
    pub fn backend_record(&self) -> BackendRecord {
        self.config_management
            .clone()
            .unwrap_or_else(BackendRecord::dummy)
    }
}

/// A live provisioned instance of a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceData {
    pub instance_id: String,
    pub node_id: String,
    pub resolved_node_definition: ResolvedNodeDefinition,
}

impl InstanceData {
    pub fn new(instance_id: impl Into<String>, definition: ResolvedNodeDefinition) -> Self {
        Self {
            instance_id: instance_id.into(),
            node_id: definition.node_id.clone(),
            resolved_node_definition: definition,
        }
    }

    pub fn infra_id(&self) -> &str {
        &self.resolved_node_definition.infra_id
    }

    pub fn backend_record(&self) -> BackendRecord {
        self.resolved_node_definition.backend_record()
    }
}

/// Attribute address inside a node's attribute store.
///
/// `"a.b.c"` and `["a", "b", "c"]` normalize to the same path; sequence
/// segments that themselves contain dots are split as well.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttributePath(Vec<String>);

impl AttributePath {
    pub fn parse(dotted: &str) -> Self {
        Self(dotted.split('.').map(str::to_string).collect())
    }

    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            segments
                .into_iter()
                .flat_map(|s| {
                    s.as_ref()
                        .split('.')
                        .map(str::to_string)
                        .collect::<Vec<_>>()
                })
                .collect(),
        )
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Normalized lookup key.
    pub fn dotted(&self) -> String {
        self.0.join(".")
    }

    pub fn validate(&self) -> CmResult<()> {
        if self.0.is_empty() || self.0.iter().any(String::is_empty) {
            return Err(CmError::InvalidAttributePath {
                spec: self.dotted(),
            });
        }
        Ok(())
    }
}

impl std::fmt::Display for AttributePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.dotted())
    }
}

impl From<&str> for AttributePath {
    fn from(s: &str) -> Self {
        Self::parse(s)
    }
}

impl From<String> for AttributePath {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

impl From<Vec<String>> for AttributePath {
    fn from(v: Vec<String>) -> Self {
        Self::from_segments(v)
    }
}

impl From<Vec<&str>> for AttributePath {
    fn from(v: Vec<&str>) -> Self {
        Self::from_segments(v)
    }
}

impl From<&[&str]> for AttributePath {
    fn from(v: &[&str]) -> Self {
        Self::from_segments(v)
    }
}

impl<const N: usize> From<[&str; N]> for AttributePath {
    fn from(v: [&str; N]) -> Self {
        Self::from_segments(v)
    }
}

/// Resolve a path against nested attribute mappings.
pub fn get_dotted<'a>(attrs: &'a Map<String, Value>, path: &AttributePath) -> Option<&'a Value> {
    let (first, rest) = path.segments().split_first()?;
    let mut current = attrs.get(first)?;
    for segment in rest {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Store `value` under a dotted key, creating intermediate mappings.
/// Non-mapping intermediates are replaced.
pub fn set_dotted(attrs: &mut Map<String, Value>, dotted: &str, value: Value) {
    let path = AttributePath::parse(dotted);
    let Some((last, parents)) = path.segments().split_last() else {
        return;
    };

    let mut current = attrs;
    for segment in parents {
        let slot = current
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        let Value::Object(map) = slot else {
            return;
        };
        current = map;
    }
    current.insert(last.clone(), value);
}
