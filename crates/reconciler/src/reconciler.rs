//! Deploy orchestration.
//!
//! A run has three phases:
//!
//! 1. **Observe**: drain every provider listing into fresh registries. Any
//!    failure here aborts the run before anything is mutated.
//! 2. **Declare**: merge the configuration into the registries by name.
//! 3. **Sync**: converge entities one at a time, stage by stage, so that
//!    every reference points at a stage that already ran.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

use nimbus_core::ResourceKind;
use nimbus_provider::{ApiGatewayInfo, Discovery, Provider, ProviderError};
use tracing::{debug, info, warn};

use crate::config::{
    DeployConfig, DeployOptions, EventTarget, HttpApiConfig, ResourceConfig, TriggerKind,
};
use crate::entity::{Entity, Observed, SyncContext, Syncable};
use crate::error::{Error, Result};
use crate::openapi::{self, OpenApiDocument, RouteDeclaration};
use crate::registry::Registries;
use crate::resources::{
    AccountSpec, Artifact, BucketSpec, FunctionSpec, GatewayEntity, GatewaySpec, ObservedAccount,
    QueueSpec, RegistrySpec, TriggerSpec,
};
use crate::types::{DeployReport, ResourceState, ResourceStatus, ServiceInfo};

/// `info.version` of the synthesized gateway document.
const API_VERSION: &str = "1.0.0";

/// Converges a service configuration against one account.
pub struct Reconciler {
    provider: Arc<dyn Provider>,
}

impl Reconciler {
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    /// Deploy `config`. `artifacts` maps function keys to their packaged code.
    ///
    /// Per-entity failures are collected in the report; only configuration
    /// and discovery errors fail the whole run.
    ///
    /// # Errors
    ///
    /// Returns a configuration error, or [`Error::Discovery`] if the account
    /// could not be listed.
    pub async fn deploy(
        &self,
        config: &DeployConfig,
        artifacts: &BTreeMap<String, Artifact>,
    ) -> Result<DeployReport> {
        config.validate()?;
        let options = DeployOptions::from_config(config);
        let registries = self.prepare(config, artifacts).await?;

        info!(
            service = %options.service,
            stage = %options.stage,
            entities = registries.len(),
            "Starting deploy"
        );

        let report = self.sync_all(&registries, &options).await;

        if report.converged {
            info!(changed = report.changed_count(), "Deploy converged");
        } else {
            warn!(
                changed = report.changed_count(),
                failed = report.failures.len(),
                "Deploy finished with failures"
            );
        }
        Ok(report)
    }

    /// Show each declared resource and whether it exists, without mutating.
    ///
    /// # Errors
    ///
    /// Same as [`Reconciler::deploy`].
    pub async fn describe(&self, config: &DeployConfig) -> Result<ServiceInfo> {
        config.validate()?;
        let registries = self.prepare(config, &BTreeMap::new()).await?;

        let mut resources = Vec::new();
        resources.extend(declared_statuses(registries.accounts.iter(), |_| None));
        resources.extend(declared_statuses(registries.queues.iter(), |q| q.url.clone()));
        resources.extend(declared_statuses(registries.buckets.iter(), |_| None));
        resources.extend(declared_statuses(
            registries.container_registries.iter(),
            |_| None,
        ));
        resources.extend(declared_statuses(registries.functions.iter(), |f| {
            f.http_invoke_url.clone()
        }));
        resources.extend(declared_statuses(registries.triggers.iter(), |_| None));
        resources.extend(declared_statuses(registries.gateway.iter(), |g| {
            g.domain.clone()
        }));

        let endpoint = registries
            .gateway
            .as_ref()
            .and_then(Entity::initial)
            .and_then(|gateway| gateway.domain.clone());

        Ok(ServiceInfo {
            service: config.service.clone(),
            stage: config.stage.clone(),
            resources,
            endpoint,
        })
    }

    /// Synthesize the gateway document against the IDs currently in the
    /// account. `None` if the service declares no HTTP routes.
    ///
    /// # Errors
    ///
    /// Same as [`Reconciler::deploy`], plus any synthesis error.
    pub async fn render_gateway(&self, config: &DeployConfig) -> Result<Option<OpenApiDocument>> {
        config.validate()?;
        let options = DeployOptions::from_config(config);
        let registries = self.prepare(config, &BTreeMap::new()).await?;

        let Some(gateway) = &registries.gateway else {
            return Ok(None);
        };
        let Some(spec) = gateway.desired() else {
            return Ok(None);
        };
        openapi::synthesize(gateway.name(), spec, &registries, &options.function_tag).map(Some)
    }

    /// Observe the account and merge the configuration into it.
    async fn prepare(
        &self,
        config: &DeployConfig,
        artifacts: &BTreeMap<String, Artifact>,
    ) -> Result<Registries> {
        let discovery = Discovery::new(Arc::clone(&self.provider));
        let mut registries = observe(&discovery, config)
            .await
            .map_err(Error::Discovery)?;
        declare(&mut registries, config, artifacts)?;
        Ok(registries)
    }

    async fn sync_all(&self, registries: &Registries, options: &DeployOptions) -> DeployReport {
        let ctx = SyncContext {
            provider: self.provider.as_ref(),
            resolver: registries,
            options,
        };
        let mut report = DeployReport::new(&options.service, &options.stage);

        for stage in ResourceKind::STAGES {
            debug!(stage = %stage, "Syncing stage");
            match stage {
                ResourceKind::ServiceAccount => {
                    sync_stage(registries.accounts.iter(), &ctx, &mut report).await;
                }
                ResourceKind::MessageQueue => {
                    sync_stage(registries.queues.iter(), &ctx, &mut report).await;
                }
                ResourceKind::ObjectStorageBucket => {
                    sync_stage(registries.buckets.iter(), &ctx, &mut report).await;
                }
                ResourceKind::ContainerRegistry => {
                    sync_stage(registries.container_registries.iter(), &ctx, &mut report).await;
                }
                ResourceKind::Function => {
                    sync_stage(registries.functions.iter(), &ctx, &mut report).await;
                }
                ResourceKind::Trigger => {
                    sync_stage(registries.triggers.iter(), &ctx, &mut report).await;
                }
                ResourceKind::ApiGateway => {
                    sync_stage(registries.gateway.iter(), &ctx, &mut report).await;
                }
            }
        }

        report
    }
}

/// Sync each entity once; a failure is recorded and the next one runs.
async fn sync_stage<'a, O, D>(
    entities: impl Iterator<Item = &'a Entity<O, D>>,
    ctx: &SyncContext<'_>,
    report: &mut DeployReport,
) where
    O: Observed + 'a,
    D: 'a,
    Entity<O, D>: Syncable,
{
    for entity in entities {
        let result = match entity.begin_sync() {
            Ok(()) => entity.sync(ctx).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(outcome) => report.record_success(entity.kind(), entity.name(), outcome),
            Err(error) => {
                warn!(
                    kind = %entity.kind(),
                    name = entity.name(),
                    error = %error,
                    "Sync failed"
                );
                report.record_failure(entity.kind(), entity.name(), error);
            }
        }
    }
}

/// Build registries from everything the account currently holds.
async fn observe(
    discovery: &Discovery,
    config: &DeployConfig,
) -> std::result::Result<Registries, ProviderError> {
    let mut registries = Registries::default();

    let roles = discovery.roles_by_subject().await?;
    for account in discovery.service_accounts().await? {
        let observed = ObservedAccount {
            info: account.clone(),
            roles: roles.get(&account.id).cloned().unwrap_or_default(),
        };
        registries.accounts.observe(&account.name, observed);
    }
    for queue in discovery.queues().await? {
        registries.queues.observe(&queue.name, queue.clone());
    }
    for bucket in discovery.buckets().await? {
        registries.buckets.observe(&bucket.name, bucket.clone());
    }
    for registry in discovery.registries().await? {
        registries
            .container_registries
            .observe(&registry.name, registry.clone());
    }
    for function in discovery.functions().await? {
        registries.functions.observe(&function.name, function.clone());
    }

    let functions: BTreeSet<String> = registries
        .functions
        .iter()
        .map(|f| f.name().to_string())
        .chain(config.functions.keys().map(|key| config.function_name(key)))
        .collect();
    for trigger in discovery.triggers().await? {
        if is_function_trigger(&trigger.name, &functions) {
            registries.triggers.observe(&trigger.name, trigger.clone());
        } else {
            debug!(name = %trigger.name, "Ignoring trigger of another service");
        }
    }

    if let Some(gateway) = discovery.api_gateway(&config.gateway_name()).await? {
        registries.gateway = Some(observed_gateway(gateway));
    }

    debug!(entities = registries.len(), "Observed account");
    Ok(registries)
}

fn observed_gateway(info: ApiGatewayInfo) -> GatewayEntity {
    let name = info.name.clone();
    GatewayEntity::observed(ResourceKind::ApiGateway, name, info)
}

/// Whether `name` is the natural key of a trigger on one of `functions`.
fn is_function_trigger(name: &str, functions: &BTreeSet<String>) -> bool {
    name.rsplit_once('-').is_some_and(|(function, tag)| {
        TriggerKind::ALL.iter().any(|kind| kind.tag() == tag) && functions.contains(function)
    })
}

/// Merge the configuration into `registries`.
fn declare(
    registries: &mut Registries,
    config: &DeployConfig,
    artifacts: &BTreeMap<String, Artifact>,
) -> Result<()> {
    for (name, resource) in &config.resources {
        match resource {
            ResourceConfig::ServiceAccount { roles } => {
                registries.accounts.declare(
                    name,
                    AccountSpec {
                        roles: roles.clone(),
                    },
                )?;
            }
            ResourceConfig::MessageQueue { fifo } => {
                registries.queues.declare(name, QueueSpec { fifo: *fifo })?;
            }
            ResourceConfig::ObjectStorageBucket {} => {
                registries.buckets.declare(name, BucketSpec)?;
            }
            ResourceConfig::ContainerRegistry {} => {
                registries.container_registries.declare(name, RegistrySpec)?;
            }
        }
    }

    let mut routes = Vec::new();
    for (key, function) in &config.functions {
        let name = config.function_name(key);
        registries.functions.declare(
            &name,
            FunctionSpec {
                runtime: function.runtime.clone(),
                handler: function.handler.clone(),
                memory_mb: function.memory_size,
                timeout_secs: function.timeout,
                environment: function.environment.clone(),
                account: function.account.clone(),
                registry: function.registry.clone(),
                tags: function.tags.clone(),
                artifact: artifacts.get(key).cloned(),
            },
        )?;

        for event in &function.events {
            match event.clone().into_target() {
                EventTarget::Trigger(event) => {
                    registries.triggers.declare(
                        event.kind().trigger_name(&name),
                        TriggerSpec {
                            function: name.clone(),
                            function_account: function.account.clone(),
                            event,
                        },
                    )?;
                }
                EventTarget::Route(event) => routes.push(RouteDeclaration {
                    function: name.clone(),
                    account: event.account.clone().or_else(|| function.account.clone()),
                    event,
                }),
            }
        }
    }

    if routes.is_empty() {
        return Ok(());
    }

    let spec = GatewaySpec {
        title: config.service.clone(),
        version: API_VERSION.to_string(),
        api: gateway_api(config),
        routes,
    };
    match &mut registries.gateway {
        Some(gateway) => gateway.set_new_state(spec)?,
        None => {
            registries.gateway = Some(GatewayEntity::declared(
                ResourceKind::ApiGateway,
                config.gateway_name(),
                spec,
            ));
        }
    }
    Ok(())
}

/// The `http_api` block with authorizer functions renamed to their
/// provider-side names.
fn gateway_api(config: &DeployConfig) -> HttpApiConfig {
    let mut api = config.provider.http_api.clone().unwrap_or_default();
    for authorizer in api.authorizers.values_mut() {
        authorizer.function = config.function_name(&authorizer.function);
    }
    api
}

/// Status lines for the declared entities in `entities`.
fn declared_statuses<'a, O, D>(
    entities: impl Iterator<Item = &'a Entity<O, D>>,
    url: impl Fn(&O) -> Option<String>,
) -> Vec<ResourceStatus>
where
    O: Observed + 'a,
    D: 'a,
{
    entities
        .filter(|entity| entity.desired().is_some())
        .map(|entity| ResourceStatus {
            kind: entity.kind(),
            name: entity.name().to_string(),
            state: entity.id().map_or(ResourceState::NotDeployed, |id| {
                ResourceState::Deployed { id: id.to_string() }
            }),
            url: entity.initial().and_then(&url),
        })
        .collect()
}

/// Read the packaged artifact of every function that declares one.
/// Relative paths are resolved against `base_dir`.
///
/// # Errors
///
/// Returns a configuration error naming the unreadable file.
pub fn load_artifacts(
    config: &DeployConfig,
    base_dir: &Path,
) -> Result<BTreeMap<String, Artifact>> {
    config
        .functions
        .iter()
        .filter_map(|(key, function)| function.package.as_ref().map(|path| (key, path)))
        .map(|(key, path)| -> Result<(String, Artifact)> {
            let content = nimbus_core::read_bytes(base_dir.join(path))?;
            Ok((key.clone(), Artifact::new(content)))
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use nimbus_provider::{InMemoryProvider, ProviderCall, Snapshot};

    use super::*;

    fn config(raw: &str) -> DeployConfig {
        DeployConfig::from_yaml_str(raw).expect("parse")
    }

    #[test]
    fn test_trigger_ownership_by_natural_key() {
        let functions = BTreeSet::from(["api".to_string(), "my-fn".to_string()]);
        assert!(is_function_trigger("api-cron", &functions));
        assert!(is_function_trigger("my-fn-ymq", &functions));
        assert!(!is_function_trigger("api-hourly", &functions));
        assert!(!is_function_trigger("other-cron", &functions));
        assert!(!is_function_trigger("cron", &functions));
    }

    #[tokio::test]
    async fn test_discovery_failure_aborts_before_mutation() {
        let provider = Arc::new(InMemoryProvider::new());
        provider.fail_on("list_functions", "*").await;
        let reconciler = Reconciler::new(provider.clone());
        let config = config(
            "
service: shop
resources:
  jobs:
    type: message_queue
",
        );

        let err = reconciler
            .deploy(&config, &BTreeMap::new())
            .await
            .expect_err("discovery");

        assert!(matches!(err, Error::Discovery(_)));
        assert!(provider.mutations().await.is_empty());
    }

    #[tokio::test]
    async fn test_describe_reports_deployed_and_missing() {
        let provider = Arc::new(InMemoryProvider::from_snapshot(Snapshot {
            functions: vec![nimbus_provider::FunctionInfo {
                id: "fn-live".to_string(),
                name: "api".to_string(),
                http_invoke_url: Some("https://fn.example/api".to_string()),
            }],
            ..Snapshot::default()
        }));
        let reconciler = Reconciler::new(provider.clone());
        let config = config(
            "
service: shop
functions:
  api:
    handler: index.handler
    runtime: python311
  worker:
    handler: index.handler
    runtime: python311
",
        );

        let info = reconciler.describe(&config).await.expect("describe");

        let api = info.status(ResourceKind::Function, "api").expect("api");
        assert_eq!(
            api.state,
            ResourceState::Deployed {
                id: "fn-live".to_string()
            }
        );
        assert_eq!(api.url.as_deref(), Some("https://fn.example/api"));
        let worker = info.status(ResourceKind::Function, "worker").expect("worker");
        assert_eq!(worker.state, ResourceState::NotDeployed);
        assert!(provider
            .calls()
            .await
            .iter()
            .all(|call| !call.is_mutation()));
    }

    #[tokio::test]
    async fn test_no_routes_means_no_gateway() {
        let reconciler = Reconciler::new(Arc::new(InMemoryProvider::new()));
        let config = config(
            "
service: shop
functions:
  api:
    handler: index.handler
    runtime: python311
",
        );

        let document = reconciler.render_gateway(&config).await.expect("render");
        assert!(document.is_none());
    }

    #[tokio::test]
    async fn test_sync_stage_records_each_entity_once() {
        let provider = Arc::new(InMemoryProvider::new());
        let reconciler = Reconciler::new(provider.clone());
        let config = config(
            "
service: shop
resources:
  a:
    type: message_queue
  b:
    type: message_queue
",
        );

        let report = reconciler
            .deploy(&config, &BTreeMap::new())
            .await
            .expect("deploy");

        assert_eq!(report.outcomes.len(), 2);
        let creates = provider
            .mutations()
            .await
            .into_iter()
            .filter(|call| matches!(call, ProviderCall::CreateQueue { .. }))
            .count();
        assert_eq!(creates, 2);
    }

    #[test]
    fn test_load_artifacts_resolves_relative_paths() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("api.zip"), b"zip-bytes").expect("write");
        let config = config(
            "
service: shop
functions:
  api:
    handler: index.handler
    runtime: python311
    package: api.zip
  bare:
    handler: index.handler
    runtime: python311
",
        );

        let artifacts = load_artifacts(&config, dir.path()).expect("load");

        assert_eq!(artifacts.len(), 1);
        assert_eq!(
            artifacts.get("api").map(Artifact::content),
            Some(b"zip-bytes".as_slice())
        );
    }

    #[test]
    fn test_load_artifacts_reports_missing_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = config(
            "
service: shop
functions:
  api:
    handler: index.handler
    runtime: python311
    package: missing.zip
",
        );

        let err = load_artifacts(&config, dir.path()).expect_err("missing");
        assert!(err.to_string().contains("missing.zip"));
    }
}
