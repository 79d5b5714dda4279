//! Deployment configuration.
//!
//! The YAML document a user writes: functions with their events, auxiliary
//! resources, and the optional HTTP API block. Loading is plain serde; the
//! semantic checks live in [`DeployConfig::validate`].

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use nimbus_provider::{ImageEvent, ObjectEvent};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Artifacts above this size are uploaded to object storage instead of
/// being sent inline (3.5 MiB).
pub const INLINE_ARTIFACT_LIMIT: u64 = 7 * 1024 * 1024 / 2;

/// Artifacts above this size are rejected outright (128 MiB).
pub const MAX_ARTIFACT_SIZE: u64 = 128 * 1024 * 1024;

/// Function version tag used when none is given.
pub const DEFAULT_FUNCTION_TAG: &str = "$latest";

const DEFAULT_STAGE: &str = "dev";

/// Top level deployment configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployConfig {
    pub service: String,

    #[serde(default = "default_stage")]
    pub stage: String,

    #[serde(default)]
    pub provider: ProviderSettings,

    #[serde(default)]
    pub functions: BTreeMap<String, FunctionConfig>,

    #[serde(default)]
    pub resources: BTreeMap<String, ResourceConfig>,
}

fn default_stage() -> String {
    DEFAULT_STAGE.to_string()
}

/// Account-wide deploy settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    /// Bucket used for artifacts too large to inline.
    pub deployment_bucket: Option<String>,
    pub http_api: Option<HttpApiConfig>,
    pub artifact_limits: ArtifactLimits,
    pub role_update: RoleUpdatePolicy,
}

/// Size thresholds for function artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactLimits {
    pub inline_bytes: u64,
    pub max_bytes: u64,
}

impl Default for ArtifactLimits {
    fn default() -> Self {
        Self {
            inline_bytes: INLINE_ARTIFACT_LIMIT,
            max_bytes: MAX_ARTIFACT_SIZE,
        }
    }
}

/// How service account role changes are applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleUpdatePolicy {
    /// Add and remove only the roles that changed; the account keeps its ID.
    #[default]
    Diff,
    /// Delete the account and create it again with the new roles.
    Recreate,
}

/// The `http_api` block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpApiConfig {
    /// Gateway name; defaults to the service name.
    pub name: Option<String>,
    pub payload: PayloadFormat,
    pub authorizers: BTreeMap<String, AuthorizerConfig>,
}

/// Event payload format version sent to functions behind the gateway.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PayloadFormat {
    #[serde(rename = "0.1")]
    V0_1,
    #[default]
    #[serde(rename = "1.0")]
    V1_0,
}

impl PayloadFormat {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::V0_1 => "0.1",
            Self::V1_0 => "1.0",
        }
    }
}

/// A function authorizer usable by HTTP routes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizerConfig {
    /// Logical key of the authorizer function.
    pub function: String,
    #[serde(default)]
    pub account: Option<String>,
    #[serde(default)]
    pub account_id: Option<String>,
    #[serde(default)]
    pub result_ttl: Option<u64>,
}

/// One function declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionConfig {
    /// Provider-side name; defaults to the logical key.
    #[serde(default)]
    pub name: Option<String>,
    pub handler: String,
    pub runtime: String,
    /// Memory in MiB.
    #[serde(default = "default_memory_size")]
    pub memory_size: u64,
    /// Execution timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default)]
    pub environment: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub account: Option<String>,
    #[serde(default)]
    pub registry: Option<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Path to the packaged zip artifact.
    #[serde(default)]
    pub package: Option<PathBuf>,
    #[serde(default, with = "serde_yaml::with::singleton_map_recursive")]
    pub events: Vec<FunctionEvent>,
}

const fn default_memory_size() -> u64 {
    128
}

const fn default_timeout() -> u64 {
    5
}

/// Auxiliary resources declared next to the functions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResourceConfig {
    ServiceAccount {
        #[serde(default)]
        roles: BTreeSet<String>,
    },
    MessageQueue {
        #[serde(default)]
        fifo: bool,
    },
    ObjectStorageBucket {},
    ContainerRegistry {},
}

/// An event source declared on a function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FunctionEvent {
    #[serde(rename = "cron")]
    Cron(CronEvent),
    #[serde(rename = "s3")]
    ObjectStorage(ObjectStorageEvent),
    #[serde(rename = "ymq")]
    MessageQueue(MessageQueueEvent),
    #[serde(rename = "cr")]
    ContainerRegistry(ContainerRegistryEvent),
    #[serde(rename = "yds")]
    DataStream(DataStreamEvent),
    #[serde(rename = "http")]
    Http(HttpEvent),
}

/// A function event split into the two places it ends up.
#[derive(Debug, Clone, PartialEq)]
pub enum EventTarget {
    Trigger(TriggerEvent),
    Route(HttpEvent),
}

impl FunctionEvent {
    #[must_use]
    pub fn into_target(self) -> EventTarget {
        match self {
            Self::Cron(e) => EventTarget::Trigger(TriggerEvent::Cron(e)),
            Self::ObjectStorage(e) => EventTarget::Trigger(TriggerEvent::ObjectStorage(e)),
            Self::MessageQueue(e) => EventTarget::Trigger(TriggerEvent::MessageQueue(e)),
            Self::ContainerRegistry(e) => EventTarget::Trigger(TriggerEvent::ContainerRegistry(e)),
            Self::DataStream(e) => EventTarget::Trigger(TriggerEvent::DataStream(e)),
            Self::Http(e) => EventTarget::Route(e),
        }
    }
}

/// Trigger variant tag; also the suffix of the trigger's natural key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TriggerKind {
    Cron,
    ObjectStorage,
    MessageQueue,
    ContainerRegistry,
    DataStream,
}

impl TriggerKind {
    pub const ALL: [Self; 5] = [
        Self::Cron,
        Self::ObjectStorage,
        Self::MessageQueue,
        Self::ContainerRegistry,
        Self::DataStream,
    ];

    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Cron => "cron",
            Self::ObjectStorage => "s3",
            Self::MessageQueue => "ymq",
            Self::ContainerRegistry => "cr",
            Self::DataStream => "yds",
        }
    }

    /// Natural key of this trigger kind on `function`.
    #[must_use]
    pub fn trigger_name(self, function: &str) -> String {
        format!("{function}-{}", self.tag())
    }
}

/// Declared trigger parameters, one variant per trigger type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerEvent {
    Cron(CronEvent),
    ObjectStorage(ObjectStorageEvent),
    MessageQueue(MessageQueueEvent),
    ContainerRegistry(ContainerRegistryEvent),
    DataStream(DataStreamEvent),
}

impl TriggerEvent {
    #[must_use]
    pub const fn kind(&self) -> TriggerKind {
        match self {
            Self::Cron(_) => TriggerKind::Cron,
            Self::ObjectStorage(_) => TriggerKind::ObjectStorage,
            Self::MessageQueue(_) => TriggerKind::MessageQueue,
            Self::ContainerRegistry(_) => TriggerKind::ContainerRegistry,
            Self::DataStream(_) => TriggerKind::DataStream,
        }
    }

    #[must_use]
    pub const fn invoke(&self) -> &InvokeSettings {
        match self {
            Self::Cron(e) => &e.invoke,
            Self::ObjectStorage(e) => &e.invoke,
            Self::MessageQueue(e) => &e.invoke,
            Self::ContainerRegistry(e) => &e.invoke,
            Self::DataStream(e) => &e.invoke,
        }
    }
}

/// Settings shared by every trigger: who invokes, retries, dead letters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvokeSettings {
    #[serde(default)]
    pub account: Option<String>,
    #[serde(default)]
    pub account_id: Option<String>,
    #[serde(default)]
    pub retry: Option<RetryConfig>,
    #[serde(default)]
    pub dlq: Option<String>,
    #[serde(default)]
    pub dlq_id: Option<String>,
    #[serde(default)]
    pub dlq_account: Option<String>,
    #[serde(default)]
    pub dlq_account_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    pub attempts: u32,
    /// Seconds between attempts.
    pub interval: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CronEvent {
    pub expression: String,
    #[serde(flatten)]
    pub invoke: InvokeSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectStorageEvent {
    pub bucket: String,
    #[serde(default = "default_object_events")]
    pub events: Vec<ObjectEvent>,
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub suffix: Option<String>,
    #[serde(flatten)]
    pub invoke: InvokeSettings,
}

fn default_object_events() -> Vec<ObjectEvent> {
    vec![ObjectEvent::Create, ObjectEvent::Update, ObjectEvent::Delete]
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageQueueEvent {
    #[serde(default)]
    pub queue: Option<String>,
    #[serde(default)]
    pub queue_id: Option<String>,
    /// Account used to read from the queue; defaults to the invoking account.
    #[serde(default)]
    pub queue_account: Option<String>,
    #[serde(default)]
    pub queue_account_id: Option<String>,
    #[serde(default = "default_batch")]
    pub batch: u32,
    #[serde(default = "default_cutoff")]
    pub cutoff: u64,
    #[serde(flatten)]
    pub invoke: InvokeSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRegistryEvent {
    #[serde(default)]
    pub registry: Option<String>,
    #[serde(default)]
    pub registry_id: Option<String>,
    #[serde(default)]
    pub image_name: Option<String>,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default = "default_image_events")]
    pub events: Vec<ImageEvent>,
    #[serde(flatten)]
    pub invoke: InvokeSettings,
}

fn default_image_events() -> Vec<ImageEvent> {
    vec![ImageEvent::CreateImage, ImageEvent::CreateImageTag]
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataStreamEvent {
    pub stream: String,
    pub database: String,
    /// Account used to read the stream; required, separate from the invoker.
    #[serde(default)]
    pub stream_account: Option<String>,
    #[serde(default)]
    pub stream_account_id: Option<String>,
    #[serde(default = "default_batch")]
    pub batch: u32,
    #[serde(default = "default_cutoff")]
    pub cutoff: u64,
    #[serde(flatten)]
    pub invoke: InvokeSettings,
}

const fn default_batch() -> u32 {
    10
}

const fn default_cutoff() -> u64 {
    10
}

/// HTTP method of a gateway route.
///
/// Serializes to the OpenAPI path-item key; `Any` becomes the gateway's
/// any-method extension key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum HttpMethod {
    #[serde(rename = "get", alias = "GET")]
    Get,
    #[serde(rename = "put", alias = "PUT")]
    Put,
    #[serde(rename = "post", alias = "POST")]
    Post,
    #[serde(rename = "delete", alias = "DELETE")]
    Delete,
    #[serde(rename = "options", alias = "OPTIONS")]
    Options,
    #[serde(rename = "head", alias = "HEAD")]
    Head,
    #[serde(rename = "patch", alias = "PATCH")]
    Patch,
    #[serde(
        rename(serialize = "x-yc-apigateway-any-method", deserialize = "any"),
        alias = "ANY"
    )]
    Any,
}

impl HttpMethod {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Put => "PUT",
            Self::Post => "POST",
            Self::Delete => "DELETE",
            Self::Options => "OPTIONS",
            Self::Head => "HEAD",
            Self::Patch => "PATCH",
            Self::Any => "ANY",
        }
    }
}

/// An HTTP route served by a function through the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpEvent {
    pub method: HttpMethod,
    pub path: String,
    #[serde(default)]
    pub authorizer: Option<String>,
    #[serde(default)]
    pub context: Option<serde_json::Value>,
    /// Invoking account for this route; defaults to the function's account.
    #[serde(default)]
    pub account: Option<String>,
}

impl DeployConfig {
    /// Parse a YAML document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the document does not parse.
    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        serde_yaml::from_str(raw).map_err(|e| Error::invalid_config(e.to_string()))
    }

    /// Read and parse a YAML file.
    ///
    /// # Errors
    ///
    /// Returns the loading error from [`nimbus_core::read_yaml`].
    pub fn load(path: impl AsRef<Path>) -> nimbus_core::Result<Self> {
        nimbus_core::read_yaml(path)
    }

    /// Provider-side name of the function declared under `key`.
    #[must_use]
    pub fn function_name(&self, key: &str) -> String {
        self.functions
            .get(key)
            .and_then(|f| f.name.clone())
            .unwrap_or_else(|| key.to_string())
    }

    /// Name of the service's API gateway.
    #[must_use]
    pub fn gateway_name(&self) -> String {
        self.provider
            .http_api
            .as_ref()
            .and_then(|api| api.name.clone())
            .unwrap_or_else(|| self.service.clone())
    }

    /// Check the configuration for mistakes serde cannot catch.
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.service.trim().is_empty() {
            return Err(Error::invalid_config("service name is empty"));
        }

        let mut names = HashSet::new();
        for key in self.functions.keys() {
            let name = self.function_name(key);
            if !names.insert(name.clone()) {
                return Err(Error::invalid_config(format!(
                    "function name '{name}' is used by more than one function"
                )));
            }
        }

        let authorizers = self
            .provider
            .http_api
            .as_ref()
            .map(|api| &api.authorizers);

        for (key, function) in &self.functions {
            let mut kinds = HashSet::new();
            for event in &function.events {
                match event.clone().into_target() {
                    EventTarget::Trigger(trigger) => {
                        let kind = trigger.kind();
                        if !kinds.insert(kind) {
                            return Err(Error::invalid_config(format!(
                                "function '{key}' declares more than one '{}' trigger",
                                kind.tag()
                            )));
                        }
                    }
                    EventTarget::Route(route) => {
                        if !route.path.starts_with('/') {
                            return Err(Error::invalid_config(format!(
                                "function '{key}' route path '{}' must start with '/'",
                                route.path
                            )));
                        }
                        if let Some(name) = &route.authorizer {
                            let known = authorizers.is_some_and(|a| a.contains_key(name));
                            if !known {
                                return Err(Error::UnknownAuthorizer {
                                    function: key.clone(),
                                    authorizer: name.clone(),
                                });
                            }
                        }
                    }
                }
            }
        }

        if let Some(authorizers) = authorizers {
            for (name, authorizer) in authorizers {
                if !self.functions.contains_key(&authorizer.function) {
                    return Err(Error::invalid_config(format!(
                        "authorizer '{name}' uses undeclared function '{}'",
                        authorizer.function
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Run-wide options derived from the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployOptions {
    pub service: String,
    pub stage: String,
    pub deployment_bucket: Option<String>,
    pub artifact_limits: ArtifactLimits,
    pub role_update: RoleUpdatePolicy,
    pub function_tag: String,
}

impl Default for DeployOptions {
    fn default() -> Self {
        Self {
            service: "service".to_string(),
            stage: DEFAULT_STAGE.to_string(),
            deployment_bucket: None,
            artifact_limits: ArtifactLimits::default(),
            role_update: RoleUpdatePolicy::default(),
            function_tag: DEFAULT_FUNCTION_TAG.to_string(),
        }
    }
}

impl DeployOptions {
    #[must_use]
    pub fn from_config(config: &DeployConfig) -> Self {
        Self {
            service: config.service.clone(),
            stage: config.stage.clone(),
            deployment_bucket: config.provider.deployment_bucket.clone(),
            artifact_limits: config.provider.artifact_limits,
            role_update: config.provider.role_update,
            function_tag: DEFAULT_FUNCTION_TAG.to_string(),
        }
    }
}
