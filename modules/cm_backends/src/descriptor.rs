//! Typed views of the built-in backend records.

use cmkit::{BackendRecord, CmError, CmResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A backend record decoded after its key set has been checked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendSpec {
    Chef {
        endpoint: String,
        run_list: Vec<String>,
    },
    Puppet {
        endpoint: String,
        #[serde(default)]
        manifests: Option<Value>,
        #[serde(default)]
        modules: Option<Value>,
        #[serde(default)]
        variables: Option<Value>,
    },
    PuppetSolo {
        manifests: Value,
        #[serde(default)]
        modules: Option<Value>,
        #[serde(default)]
        attributes: Option<Value>,
    },
}

impl BackendSpec {
    pub fn from_record(record: &BackendRecord) -> CmResult<Self> {
        serde_json::from_value(record.to_value()).map_err(|e| CmError::InvalidDescriptor {
            protocol: record.protocol().unwrap_or_default().to_string(),
            message: e.to_string(),
        })
    }

    pub fn protocol(&self) -> &'static str {
        match self {
            BackendSpec::Chef { .. } => crate::chef::PROTOCOL_ID,
            BackendSpec::Puppet { .. } => crate::puppet::PROTOCOL_ID,
            BackendSpec::PuppetSolo { .. } => crate::puppet_solo::PROTOCOL_ID,
        }
    }

    pub fn endpoint(&self) -> Option<&str> {
        match self {
            BackendSpec::Chef { endpoint, .. } | BackendSpec::Puppet { endpoint, .. } => {
                Some(endpoint)
            }
            BackendSpec::PuppetSolo { .. } => None,
        }
    }
}
