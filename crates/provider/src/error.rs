//! Error types for provider calls.

use nimbus_core::ResourceKind;
use thiserror::Error;

/// Result type alias for provider operations.
pub type Result<T> = std::result::Result<T, ProviderError>;

/// Failures reported by the cloud provider boundary.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("{operation} rejected for '{target}': {reason}")]
    Rejected {
        operation: String,
        target: String,
        reason: String,
    },

    #[error("{kind} '{id}' not found")]
    NotFound { kind: ResourceKind, id: String },

    #[error("{kind} '{name}' already exists")]
    AlreadyExists { kind: ResourceKind, name: String },

    #[error("provider unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("invalid page token '{token}'")]
    InvalidPageToken { token: String },

    #[error("pagination did not terminate: page token '{token}' was returned twice")]
    PaginationLoop { token: String },
}

impl ProviderError {
    /// Create a rejected-call error.
    pub fn rejected(
        operation: impl Into<String>,
        target: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Rejected {
            operation: operation.into(),
            target: target.into(),
            reason: reason.into(),
        }
    }

    /// Create a not found error.
    pub fn not_found(kind: ResourceKind, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Create an already-exists error.
    pub fn already_exists(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self::AlreadyExists {
            kind,
            name: name.into(),
        }
    }

    /// Create an unavailable error.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }
}
