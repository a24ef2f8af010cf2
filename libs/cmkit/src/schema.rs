//! Key-set validation for backend records.
//!
//! Every backend type declares which keys its record must carry and which it
//! may carry. Validation reports every offending key at once.

use std::collections::BTreeSet;

use serde_json::{Map, Value};
use thiserror::Error;

/// Required and optional record keys of one backend type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchemaSpec {
    pub required: &'static [&'static str],
    pub optional: &'static [&'static str],
}

impl SchemaSpec {
    pub const fn new(required: &'static [&'static str], optional: &'static [&'static str]) -> Self {
        Self { required, optional }
    }

    pub fn check(&self, protocol: &str, data: &Map<String, Value>) -> Result<(), SchemaError> {
        check(protocol, data, self.required, self.optional)
    }
}

/// Record failed validation. Both lists are complete.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid '{protocol}' backend record: {}", describe(.missing, .invalid))]
pub struct SchemaError {
    pub protocol: String,
    /// Required keys absent from the record, in declaration order.
    pub missing: Vec<String>,
    /// Keys neither required nor optional, sorted.
    pub invalid: Vec<String>,
}

impl SchemaError {
    /// Record carries no protocol identifier at all.
    pub fn untyped() -> Self {
        Self {
            protocol: "<unset>".to_string(),
            missing: vec!["type".to_string()],
            invalid: Vec::new(),
        }
    }
}

fn describe(missing: &[String], invalid: &[String]) -> String {
    let mut parts = Vec::with_capacity(2);
    if !missing.is_empty() {
        parts.push(format!("missing key(s): {}", missing.join(", ")));
    }
    if !invalid.is_empty() {
        parts.push(format!("unknown key(s): {}", invalid.join(", ")));
    }
    parts.join("; ")
}

/// `missing = required - keys(data)`, `invalid = keys(data) - (required + optional)`.
pub fn check(
    protocol: &str,
    data: &Map<String, Value>,
    required: &[&str],
    optional: &[&str],
) -> Result<(), SchemaError> {
    let missing: Vec<String> = required
        .iter()
        .filter(|key| !data.contains_key(**key))
        .map(|key| key.to_string())
        .collect();

    let allowed: BTreeSet<&str> = required.iter().chain(optional.iter()).copied().collect();
    let invalid: Vec<String> = data
        .keys()
        .filter(|key| !allowed.contains(key.as_str()))
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    if missing.is_empty() && invalid.is_empty() {
        return Ok(());
    }

    tracing::debug!(
        protocol,
        missing = ?missing,
        invalid = ?invalid,
        "Backend record rejected by schema check"
    );

    Err(SchemaError {
        protocol: protocol.to_string(),
        missing,
        invalid,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const PUPPET: SchemaSpec =
        SchemaSpec::new(&["type", "endpoint"], &["manifests", "modules", "variables"]);

    fn record(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn accepts_required_and_optional_keys() {
        let data = record(json!({"type": "puppet", "endpoint": "http://p", "modules": []}));
        assert!(PUPPET.check("puppet", &data).is_ok());
    }

    #[test]
    fn reports_missing_endpoint() {
        let data = record(json!({"type": "puppet", "manifests": ["x"]}));
        let err = PUPPET.check("puppet", &data).unwrap_err();
        assert_eq!(err.missing, vec!["endpoint".to_string()]);
        assert!(err.invalid.is_empty());
        assert!(err.to_string().contains("missing key(s): endpoint"));
    }

    #[test]
    fn reports_every_offending_key_in_one_pass() {
        let data = record(json!({"manifests": [], "zeta": 1, "alpha": 2}));
        let err = PUPPET.check("puppet", &data).unwrap_err();
        assert_eq!(err.missing, vec!["type".to_string(), "endpoint".to_string()]);
        assert_eq!(err.invalid, vec!["alpha".to_string(), "zeta".to_string()]);

        let msg = err.to_string();
        for key in ["type", "endpoint", "alpha", "zeta"] {
            assert!(msg.contains(key), "message {msg:?} should name {key}");
        }
    }

    #[test]
    fn succeeds_iff_required_subset_of_keys_subset_of_allowed() {
        let required = ["type", "endpoint"];
        let optional = ["modules"];
        let universe = ["type", "endpoint", "modules", "extra"];

        // Every subset of the universe.
        for mask in 0u32..(1 << universe.len()) {
            let mut data = Map::new();
            for (i, key) in universe.iter().enumerate() {
                if mask & (1 << i) != 0 {
                    data.insert(key.to_string(), json!(true));
                }
            }
            let has_required = required.iter().all(|k| data.contains_key(*k));
            let within_allowed = data
                .keys()
                .all(|k| required.contains(&k.as_str()) || optional.contains(&k.as_str()));

            let result = check("p", &data, &required, &optional);
            assert_eq!(result.is_ok(), has_required && within_allowed, "keys {:?}", data.keys());
        }
    }
}
