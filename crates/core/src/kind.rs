//! Resource kinds managed by a deploy run.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Every resource type the reconciler knows how to converge.
///
/// The declaration order is the sync order: a kind may only reference kinds
/// that come before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    ServiceAccount,
    MessageQueue,
    ObjectStorageBucket,
    ContainerRegistry,
    Function,
    Trigger,
    ApiGateway,
}

impl ResourceKind {
    /// All kinds in dependency (sync) order.
    pub const STAGES: [Self; 7] = [
        Self::ServiceAccount,
        Self::MessageQueue,
        Self::ObjectStorageBucket,
        Self::ContainerRegistry,
        Self::Function,
        Self::Trigger,
        Self::ApiGateway,
    ];

    /// Human readable label used in log lines and reports.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::ServiceAccount => "service account",
            Self::MessageQueue => "message queue",
            Self::ObjectStorageBucket => "object storage bucket",
            Self::ContainerRegistry => "container registry",
            Self::Function => "function",
            Self::Trigger => "trigger",
            Self::ApiGateway => "api gateway",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
