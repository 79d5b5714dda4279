//! Functions: validate, place the artifact, resolve references, then create
//! or update.
//!
//! Every check that can fail without the provider runs before the first
//! provider call, so an invalid function never leaves a half-uploaded
//! artifact behind.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use nimbus_core::ResourceKind;
use nimbus_provider::{ArtifactSource, FunctionInfo, FunctionRequest};
use regex::Regex;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::info;

use crate::config::DeployOptions;
use crate::entity::{Entity, Lifecycle, SyncContext, SyncOutcome, Syncable};
use crate::error::{Error, Result};
use crate::resolver::ReferenceBinder;

/// Longest accepted environment value, in UTF-16 code units.
pub const MAX_ENV_VALUE_CHARS: usize = 4096;

#[allow(clippy::expect_used)]
static ENV_KEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z][A-Za-z0-9_]*$").expect("valid env key regex (verified by tests)")
});

/// Packaged function code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    content: Arc<[u8]>,
}

impl Artifact {
    pub fn new(content: impl Into<Arc<[u8]>>) -> Self {
        Self {
            content: content.into(),
        }
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }

    pub fn size(&self) -> u64 {
        u64::try_from(self.content.len()).unwrap_or(u64::MAX)
    }

    /// Hex SHA-256 of the content.
    pub fn digest(&self) -> String {
        format!("{:x}", Sha256::digest(&self.content))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionSpec {
    pub runtime: String,
    pub handler: String,
    pub memory_mb: u64,
    pub timeout_secs: u64,
    pub environment: BTreeMap<String, Value>,
    /// Service account the function runs as.
    pub account: Option<String>,
    pub registry: Option<String>,
    pub tags: BTreeSet<String>,
    pub artifact: Option<Artifact>,
}

pub type FunctionEntity = Entity<FunctionInfo, FunctionSpec>;

/// Where the artifact goes, decided before any provider call.
enum Placement<'a> {
    Inline(&'a Artifact),
    Upload {
        artifact: &'a Artifact,
        bucket: String,
        key: String,
    },
}

/// Check environment variables and render them as strings.
///
/// # Errors
///
/// Returns [`Error::InvalidEnvironment`] for a malformed key, a non-string
/// value, or a value longer than [`MAX_ENV_VALUE_CHARS`].
pub fn validate_environment(
    function: &str,
    environment: &BTreeMap<String, Value>,
) -> Result<BTreeMap<String, String>> {
    environment
        .iter()
        .map(|(key, value)| {
            if !ENV_KEY.is_match(key) {
                return Err(Error::invalid_environment(
                    function,
                    format!(
                        "key '{key}' must start with a letter and contain only ASCII letters, \
                         digits and '_'"
                    ),
                ));
            }
            let Value::String(value) = value else {
                return Err(Error::invalid_environment(
                    function,
                    format!("value of '{key}' must be a string"),
                ));
            };
            if value.encode_utf16().count() > MAX_ENV_VALUE_CHARS {
                return Err(Error::invalid_environment(
                    function,
                    format!("value of '{key}' is longer than {MAX_ENV_VALUE_CHARS} characters"),
                ));
            }
            Ok((key.clone(), value.clone()))
        })
        .collect()
}

/// Object key for an uploaded artifact.
pub fn artifact_object_key(service: &str, function: &str, artifact: &Artifact) -> String {
    format!("{service}/{function}/{}.zip", artifact.digest())
}

impl FunctionEntity {
    fn placement<'a>(
        &self,
        artifact: &'a Artifact,
        options: &DeployOptions,
    ) -> Result<Placement<'a>> {
        let size = artifact.size();
        let limits = options.artifact_limits;
        if size > limits.max_bytes {
            return Err(Error::ArtifactTooLarge {
                function: self.name().to_string(),
                size,
                limit: limits.max_bytes,
            });
        }
        if size <= limits.inline_bytes {
            return Ok(Placement::Inline(artifact));
        }
        let bucket = options
            .deployment_bucket
            .clone()
            .ok_or_else(|| Error::MissingDeploymentBucket {
                function: self.name().to_string(),
                size,
            })?;
        Ok(Placement::Upload {
            artifact,
            bucket,
            key: artifact_object_key(&options.service, self.name(), artifact),
        })
    }

    /// Build the request; uploads the artifact if it is too big to inline.
    async fn prepare(&self, ctx: &SyncContext<'_>, spec: &FunctionSpec) -> Result<FunctionRequest> {
        let environment = validate_environment(self.name(), &spec.environment)?;
        let placement = spec
            .artifact
            .as_ref()
            .map(|artifact| self.placement(artifact, ctx.options))
            .transpose()?;

        let binder = ReferenceBinder::new(ctx.resolver, ResourceKind::Function, self.name());
        let service_account_id =
            binder.optional(ResourceKind::ServiceAccount, spec.account.as_deref(), None)?;
        let registry_id =
            binder.optional(ResourceKind::ContainerRegistry, spec.registry.as_deref(), None)?;

        let artifact = match placement {
            None => None,
            Some(Placement::Inline(artifact)) => Some(ArtifactSource::Inline {
                content: artifact.content().to_vec(),
                size: artifact.size(),
            }),
            Some(Placement::Upload {
                artifact,
                bucket,
                key,
            }) => {
                info!(name = self.name(), bucket = %bucket, key = %key, "uploading artifact");
                ctx.provider
                    .put_object(&bucket, &key, artifact.content())
                    .await
                    .map_err(self.provider_failure("put_object"))?;
                Some(ArtifactSource::ObjectStorage {
                    bucket,
                    object: key,
                })
            }
        };

        Ok(FunctionRequest {
            name: self.name().to_string(),
            runtime: spec.runtime.clone(),
            entrypoint: spec.handler.clone(),
            memory_bytes: spec.memory_mb.saturating_mul(1024 * 1024),
            execution_timeout_secs: spec.timeout_secs,
            environment,
            service_account_id,
            registry_id,
            tags: spec.tags.clone(),
            artifact,
        })
    }
}

#[async_trait]
impl Syncable for FunctionEntity {
    async fn sync(&self, ctx: &SyncContext<'_>) -> Result<SyncOutcome> {
        match self.lifecycle() {
            Lifecycle::Unmanaged(_) => Ok(super::unmanaged(self)),
            Lifecycle::Create(spec) => {
                let request = self.prepare(ctx, spec).await?;
                let created = ctx
                    .provider
                    .create_function(&request)
                    .await
                    .map_err(self.provider_failure("create_function"))?;
                super::created(self, created.id)
            }
            Lifecycle::Update { initial, desired } => {
                let request = self.prepare(ctx, desired).await?;
                ctx.provider
                    .update_function(&initial.id, &request)
                    .await
                    .map_err(self.provider_failure("update_function"))?;
                Ok(super::updated(self))
            }
        }
    }
}
