//! Wire types exchanged with the provider.
//!
//! Observed types (`*Info`) are what discovery returns. Request types are the
//! fully resolved attributes handed to mutation calls: every reference has
//! already been turned into a provider ID by the reconciler.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// One page of a discovery listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Token for the next page; `None` on the last page.
    pub next_page_token: Option<String>,
}

impl<T> Page<T> {
    /// A page with no continuation.
    #[must_use]
    pub const fn last(items: Vec<T>) -> Self {
        Self {
            items,
            next_page_token: None,
        }
    }
}

/// Returned by every create call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Created {
    pub id: String,
}

// ----------------------------------------------------------------------------
// Observed state
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionInfo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub http_invoke_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerInfo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub function_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceAccountInfo {
    pub id: String,
    pub name: String,
}

/// A folder-level role granted to a subject (service account).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RoleBinding {
    pub subject_id: String,
    pub role: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueInfo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketInfo {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryInfo {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiGatewayInfo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub domain: Option<String>,
}

// ----------------------------------------------------------------------------
// Mutation requests
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceAccountRequest {
    pub name: String,
    pub roles: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueRequest {
    pub name: String,
    pub fifo: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketRequest {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryRequest {
    pub name: String,
}

/// Where the function code comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum ArtifactSource {
    /// Zip archive sent in the request body.
    Inline {
        #[serde(skip)]
        content: Vec<u8>,
        size: u64,
    },
    /// Zip archive previously uploaded to object storage.
    ObjectStorage { bucket: String, object: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionRequest {
    pub name: String,
    pub runtime: String,
    pub entrypoint: String,
    pub memory_bytes: u64,
    pub execution_timeout_secs: u64,
    pub environment: BTreeMap<String, String>,
    pub service_account_id: Option<String>,
    pub registry_id: Option<String>,
    pub tags: BTreeSet<String>,
    pub artifact: Option<ArtifactSource>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrySettings {
    pub attempts: u32,
    pub interval_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetterTarget {
    pub queue_id: String,
    pub service_account_id: String,
}

/// The function a trigger fires and the identity it fires with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvokeTarget {
    pub function_id: String,
    pub function_tag: String,
    pub service_account_id: String,
    pub retry: Option<RetrySettings>,
    pub dead_letter: Option<DeadLetterTarget>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ObjectEvent {
    #[serde(rename = "create.object")]
    Create,
    #[serde(rename = "update.object")]
    Update,
    #[serde(rename = "delete.object")]
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ImageEvent {
    #[serde(rename = "create.image")]
    CreateImage,
    #[serde(rename = "delete.image")]
    DeleteImage,
    #[serde(rename = "create.image-tag")]
    CreateImageTag,
    #[serde(rename = "delete.image-tag")]
    DeleteImageTag,
}

/// Fully resolved trigger rule, one variant per trigger type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerRule {
    Timer {
        cron_expression: String,
        invoke: InvokeTarget,
    },
    ObjectStorage {
        bucket_id: String,
        events: Vec<ObjectEvent>,
        prefix: Option<String>,
        suffix: Option<String>,
        invoke: InvokeTarget,
    },
    MessageQueue {
        queue_id: String,
        service_account_id: String,
        batch_size: u32,
        batch_cutoff_secs: u64,
        invoke: InvokeTarget,
    },
    ContainerRegistry {
        registry_id: String,
        image_name: Option<String>,
        tag: Option<String>,
        events: Vec<ImageEvent>,
        invoke: InvokeTarget,
    },
    DataStream {
        stream: String,
        database: String,
        service_account_id: String,
        batch_size: u32,
        batch_cutoff_secs: u64,
        invoke: InvokeTarget,
    },
}

impl TriggerRule {
    /// The invocation settings shared by every variant.
    #[must_use]
    pub const fn invoke(&self) -> &InvokeTarget {
        match self {
            Self::Timer { invoke, .. }
            | Self::ObjectStorage { invoke, .. }
            | Self::MessageQueue { invoke, .. }
            | Self::ContainerRegistry { invoke, .. }
            | Self::DataStream { invoke, .. } => invoke,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerRequest {
    pub name: String,
    pub rule: TriggerRule,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiGatewayRequest {
    pub name: String,
    /// Serialized OpenAPI document.
    pub openapi_spec: String,
}
