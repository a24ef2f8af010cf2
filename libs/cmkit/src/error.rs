//! Error types for configuration-management dispatch.
//!
//! Every fallible operation in this crate returns [`CmResult`]. Adapter
//! failures that are not part of the taxonomy travel as [`CmError::Backend`]
//! and are never retried here.

use thiserror::Error;

use crate::registry::RegistryError;
use crate::schema::SchemaError;

/// Result type alias for dispatch operations.
pub type CmResult<T> = Result<T, CmError>;

/// Errors surfaced by the dispatcher and its backends.
#[derive(Debug, Error)]
pub enum CmError {
    /// Backend record failed required/optional key validation.
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// No backend registered for a protocol identifier.
    #[error("no config-management backend registered for protocol '{protocol}'")]
    UnknownBackend { protocol: String },

    /// Registry could not be assembled.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Backend record is structurally invalid (e.g. wrong field types).
    #[error("invalid '{protocol}' backend record: {message}")]
    InvalidDescriptor { protocol: String, message: String },

    /// Remote node, role or environment is absent.
    #[error("{kind} '{name}' not found on the config-management server")]
    RemoteNotFound { kind: &'static str, name: String },

    /// Requested attribute path does not resolve.
    #[error("unresolved attribute '{path}' for node '{node_id}'")]
    AttributeNotFound { node_id: String, path: String },

    /// Attribute path is empty or contains empty segments.
    #[error("invalid attribute specification '{spec}'")]
    InvalidAttributePath { spec: String },

    /// Credential store has no entry for the backend.
    #[error("no '{purpose}' credentials for '{protocol}' backend at '{endpoint}'")]
    CredentialsNotFound {
        purpose: String,
        protocol: String,
        endpoint: String,
    },

    /// Information broker lookup failed.
    #[error("information broker has no '{key}' entry for '{id}'")]
    NotFound { key: &'static str, id: String },

    /// Backend does not implement the requested operation.
    #[error("'{protocol}' backend does not support '{operation}'")]
    Unsupported {
        protocol: String,
        operation: &'static str,
    },

    /// Backend answered with a result of the wrong shape.
    #[error("'{operation}' produced an unexpected result: {actual}")]
    UnexpectedOutcome {
        operation: &'static str,
        actual: String,
    },

    /// Infrastructure-wide operation stopped at a failing backend.
    #[error("{operation} for infrastructure '{infra_id}' failed at backend #{position} ('{protocol}')")]
    Infrastructure {
        operation: &'static str,
        infra_id: String,
        protocol: String,
        position: usize,
        #[source]
        source: Box<CmError>,
    },

    /// Transient or product-specific adapter failure, propagated as-is.
    #[error("'{protocol}' backend call failed")]
    Backend {
        protocol: String,
        #[source]
        source: anyhow::Error,
    },
}

impl CmError {
    /// Creates an unknown-backend error.
    pub fn unknown_backend(protocol: impl Into<String>) -> Self {
        Self::UnknownBackend {
            protocol: protocol.into(),
        }
    }

    /// Creates a remote-not-found error.
    pub fn remote_not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::RemoteNotFound {
            kind,
            name: name.into(),
        }
    }

    /// Creates an adapter failure.
    pub fn backend(protocol: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        Self::Backend {
            protocol: protocol.into(),
            source: source.into(),
        }
    }

    /// Returns true if the error means the remote object is already gone.
    pub fn is_remote_not_found(&self) -> bool {
        match self {
            CmError::RemoteNotFound { .. } => true,
            CmError::Infrastructure { source, .. } => source.is_remote_not_found(),
            _ => false,
        }
    }

    /// Returns true for configuration errors raised before a backend is built.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            CmError::Schema(_)
                | CmError::UnknownBackend { .. }
                | CmError::InvalidDescriptor { .. }
                | CmError::CredentialsNotFound { .. }
        )
    }
}
