//! Error types for the reconciler crate.

use nimbus_core::ResourceKind;
use nimbus_provider::ProviderError;
use thiserror::Error;

/// Result type alias for reconciler operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Reconciler error types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// Environment variable failed validation.
    #[error("function '{function}' has an invalid environment: {reason}")]
    InvalidEnvironment { function: String, reason: String },

    /// A reference names a resource that does not exist or has no ID yet.
    #[error("{owner_kind} '{owner}' references {kind} '{name}', which is not available")]
    MissingReference {
        owner_kind: ResourceKind,
        owner: String,
        kind: ResourceKind,
        name: String,
    },

    /// A required reference was not configured at all.
    #[error("{owner_kind} '{owner}' requires a {kind} but none is configured")]
    UnsetReference {
        owner_kind: ResourceKind,
        owner: String,
        kind: ResourceKind,
    },

    /// Two functions declared the same route.
    #[error("route {method} {path} is declared by both '{first}' and '{second}'")]
    RouteConflict {
        path: String,
        method: String,
        first: String,
        second: String,
    },

    /// A path mixes the any-method wildcard with explicit methods.
    #[error("path '{path}' combines the any-method wildcard with explicit methods: {methods}")]
    AmbiguousRoute { path: String, methods: String },

    /// A route names an authorizer that is not configured.
    #[error("function '{function}' uses unknown authorizer '{authorizer}'")]
    UnknownAuthorizer { function: String, authorizer: String },

    /// Artifact is above the hard size cap.
    #[error("artifact for function '{function}' is {size} bytes, above the {limit} byte limit")]
    ArtifactTooLarge {
        function: String,
        size: u64,
        limit: u64,
    },

    /// Artifact must be uploaded but no deployment bucket is configured.
    #[error(
        "artifact for function '{function}' is {size} bytes and must be uploaded, \
         but no deployment bucket is configured"
    )]
    MissingDeploymentBucket { function: String, size: u64 },

    /// Desired state was assigned twice.
    #[error("{kind} '{name}' already has a desired state")]
    StateAlreadySet { kind: ResourceKind, name: String },

    /// An entity was synced twice in one run.
    #[error("{kind} '{name}' was already synced in this run")]
    AlreadySynced { kind: ResourceKind, name: String },

    /// A resolved ID was assigned twice.
    #[error("{kind} '{name}' already has a resolved ID")]
    IdAlreadyAssigned { kind: ResourceKind, name: String },

    /// A provider call failed.
    #[error("{kind} '{name}': {operation} failed: {source}")]
    Provider {
        kind: ResourceKind,
        name: String,
        operation: String,
        #[source]
        source: ProviderError,
    },

    /// Discovery of the live account failed; nothing was mutated.
    #[error("discovery failed: {0}")]
    Discovery(#[source] ProviderError),

    /// Invalid deploy configuration.
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// Document serialization failed.
    #[error("serialization error: {reason}")]
    Serialization { reason: String },
}

impl Error {
    /// Create a missing reference error.
    pub fn missing_reference(
        owner_kind: ResourceKind,
        owner: impl Into<String>,
        kind: ResourceKind,
        name: impl Into<String>,
    ) -> Self {
        Self::MissingReference {
            owner_kind,
            owner: owner.into(),
            kind,
            name: name.into(),
        }
    }

    /// Create an unset reference error.
    pub fn unset_reference(
        owner_kind: ResourceKind,
        owner: impl Into<String>,
        kind: ResourceKind,
    ) -> Self {
        Self::UnsetReference {
            owner_kind,
            owner: owner.into(),
            kind,
        }
    }

    /// Create an invalid environment error.
    pub fn invalid_environment(function: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidEnvironment {
            function: function.into(),
            reason: reason.into(),
        }
    }

    /// Create a provider error with the operation that failed.
    pub fn provider(
        kind: ResourceKind,
        name: impl Into<String>,
        operation: impl Into<String>,
        source: ProviderError,
    ) -> Self {
        Self::Provider {
            kind,
            name: name.into(),
            operation: operation.into(),
            source,
        }
    }

    /// Create an invalid config error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Whether this error was raised before any provider mutation.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidEnvironment { .. }
                | Self::MissingReference { .. }
                | Self::UnsetReference { .. }
                | Self::RouteConflict { .. }
                | Self::AmbiguousRoute { .. }
                | Self::UnknownAuthorizer { .. }
                | Self::ArtifactTooLarge { .. }
                | Self::MissingDeploymentBucket { .. }
                | Self::InvalidConfig { .. }
        )
    }
}

impl From<nimbus_core::Error> for Error {
    fn from(err: nimbus_core::Error) -> Self {
        Self::invalid_config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_reference_names_both_sides() {
        let err = Error::missing_reference(
            ResourceKind::Trigger,
            "hello-cron",
            ResourceKind::Function,
            "hello",
        );
        let text = err.to_string();
        assert!(text.contains("trigger 'hello-cron'"));
        assert!(text.contains("function 'hello'"));
        assert!(err.is_validation());
    }

    #[test]
    fn test_provider_error_is_not_validation() {
        let err = Error::provider(
            ResourceKind::Function,
            "hello",
            "create_function",
            ProviderError::unavailable("timeout"),
        );
        assert!(!err.is_validation());
        assert!(err.to_string().contains("create_function"));
    }
}
