//! Triggers. The provider cannot update a trigger in place, so a declared
//! trigger that already exists is deleted and created again, and an
//! observed trigger nobody declares is deleted.

use async_trait::async_trait;
use nimbus_core::ResourceKind;
use nimbus_provider::{
    DeadLetterTarget, InvokeTarget, RetrySettings, TriggerInfo, TriggerRequest, TriggerRule,
};
use tracing::info;

use crate::config::{InvokeSettings, TriggerEvent};
use crate::entity::{Entity, Lifecycle, SyncContext, SyncOutcome, Syncable};
use crate::error::Result;
use crate::resolver::ReferenceBinder;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerSpec {
    /// Provider-side name of the function the trigger fires.
    pub function: String,
    /// The function's own service account, used when the event names none.
    pub function_account: Option<String>,
    pub event: TriggerEvent,
}

pub type TriggerEntity = Entity<TriggerInfo, TriggerSpec>;

impl TriggerEntity {
    fn invoke_target(
        &self,
        ctx: &SyncContext<'_>,
        binder: &ReferenceBinder<'_>,
        spec: &TriggerSpec,
        invoke: &InvokeSettings,
    ) -> Result<InvokeTarget> {
        let function_id = binder.named(ResourceKind::Function, &spec.function)?;
        let service_account_id = binder.required(
            ResourceKind::ServiceAccount,
            invoke.account.as_deref().or(spec.function_account.as_deref()),
            invoke.account_id.as_deref(),
        )?;

        let dead_letter = binder
            .optional(
                ResourceKind::MessageQueue,
                invoke.dlq.as_deref(),
                invoke.dlq_id.as_deref(),
            )?
            .map(|queue_id| -> Result<DeadLetterTarget> {
                let account = binder.optional(
                    ResourceKind::ServiceAccount,
                    invoke.dlq_account.as_deref(),
                    invoke.dlq_account_id.as_deref(),
                )?;
                Ok(DeadLetterTarget {
                    queue_id,
                    service_account_id: account.unwrap_or_else(|| service_account_id.clone()),
                })
            })
            .transpose()?;

        Ok(InvokeTarget {
            function_id,
            function_tag: ctx.options.function_tag.clone(),
            service_account_id,
            retry: invoke.retry.map(|retry| RetrySettings {
                attempts: retry.attempts,
                interval_secs: retry.interval,
            }),
            dead_letter,
        })
    }

    /// Resolve every reference into a complete request.
    fn request(&self, ctx: &SyncContext<'_>, spec: &TriggerSpec) -> Result<TriggerRequest> {
        let binder = ReferenceBinder::new(ctx.resolver, ResourceKind::Trigger, self.name());
        let invoke = self.invoke_target(ctx, &binder, spec, spec.event.invoke())?;

        let rule = match &spec.event {
            TriggerEvent::Cron(event) => TriggerRule::Timer {
                cron_expression: event.expression.clone(),
                invoke,
            },
            TriggerEvent::ObjectStorage(event) => TriggerRule::ObjectStorage {
                bucket_id: ctx
                    .resolver
                    .bucket_id(&event.bucket)
                    .unwrap_or_else(|| event.bucket.clone()),
                events: event.events.clone(),
                prefix: event.prefix.clone(),
                suffix: event.suffix.clone(),
                invoke,
            },
            TriggerEvent::MessageQueue(event) => {
                let queue_id = binder.required(
                    ResourceKind::MessageQueue,
                    event.queue.as_deref(),
                    event.queue_id.as_deref(),
                )?;
                let service_account_id = binder
                    .optional(
                        ResourceKind::ServiceAccount,
                        event.queue_account.as_deref(),
                        event.queue_account_id.as_deref(),
                    )?
                    .unwrap_or_else(|| invoke.service_account_id.clone());
                TriggerRule::MessageQueue {
                    queue_id,
                    service_account_id,
                    batch_size: event.batch,
                    batch_cutoff_secs: event.cutoff,
                    invoke,
                }
            }
            TriggerEvent::ContainerRegistry(event) => TriggerRule::ContainerRegistry {
                registry_id: binder.required(
                    ResourceKind::ContainerRegistry,
                    event.registry.as_deref(),
                    event.registry_id.as_deref(),
                )?,
                image_name: event.image_name.clone(),
                tag: event.tag.clone(),
                events: event.events.clone(),
                invoke,
            },
            TriggerEvent::DataStream(event) => TriggerRule::DataStream {
                stream: event.stream.clone(),
                database: event.database.clone(),
                service_account_id: binder.required(
                    ResourceKind::ServiceAccount,
                    event.stream_account.as_deref(),
                    event.stream_account_id.as_deref(),
                )?,
                batch_size: event.batch,
                batch_cutoff_secs: event.cutoff,
                invoke,
            },
        };

        Ok(TriggerRequest {
            name: self.name().to_string(),
            rule,
        })
    }
}

#[async_trait]
impl Syncable for TriggerEntity {
    async fn sync(&self, ctx: &SyncContext<'_>) -> Result<SyncOutcome> {
        match self.lifecycle() {
            Lifecycle::Unmanaged(initial) => {
                ctx.provider
                    .delete_trigger(&initial.id)
                    .await
                    .map_err(self.provider_failure("delete_trigger"))?;
                info!(name = self.name(), id = %initial.id, "deleted undeclared trigger");
                Ok(SyncOutcome::Deleted)
            }
            Lifecycle::Create(spec) => {
                let request = self.request(ctx, spec)?;
                let created = ctx
                    .provider
                    .create_trigger(&request)
                    .await
                    .map_err(self.provider_failure("create_trigger"))?;
                super::created(self, created.id)
            }
            Lifecycle::Update { initial, desired } => {
                let request = self.request(ctx, desired)?;
                ctx.provider
                    .delete_trigger(&initial.id)
                    .await
                    .map_err(self.provider_failure("delete_trigger"))?;
                let created = ctx
                    .provider
                    .create_trigger(&request)
                    .await
                    .map_err(self.provider_failure("create_trigger"))?;
                super::replaced(self, created.id)
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use nimbus_provider::{
        ImageEvent, InMemoryProvider, ProviderCall, QueueInfo, RegistryInfo, Snapshot,
    };

    use super::*;
    use crate::config::{
        ContainerRegistryEvent, CronEvent, DataStreamEvent, DeployOptions, MessageQueueEvent,
        RetryConfig,
    };
    use crate::error::Error;
    use crate::registry::Registries;
    use crate::resources::ObservedAccount;

    fn registries_with_function() -> Registries {
        let mut registries = Registries::default();
        registries.functions.observe(
            "worker",
            nimbus_provider::FunctionInfo {
                id: "fn-live".to_string(),
                name: "worker".to_string(),
                http_invoke_url: None,
            },
        );
        registries.accounts.observe(
            "invoker",
            ObservedAccount {
                info: nimbus_provider::ServiceAccountInfo {
                    id: "sa-live".to_string(),
                    name: "invoker".to_string(),
                },
                roles: std::collections::BTreeSet::new(),
            },
        );
        registries
    }

    fn cron(account: Option<&str>) -> TriggerSpec {
        TriggerSpec {
            function: "worker".to_string(),
            function_account: None,
            event: TriggerEvent::Cron(CronEvent {
                expression: "0 * * * ? *".to_string(),
                invoke: InvokeSettings {
                    account: account.map(str::to_string),
                    retry: Some(RetryConfig {
                        attempts: 2,
                        interval: 30,
                    }),
                    ..InvokeSettings::default()
                },
            }),
        }
    }

    fn observe_account(registries: &mut Registries, name: &str, id: &str) {
        registries.accounts.observe(
            name,
            ObservedAccount {
                info: nimbus_provider::ServiceAccountInfo {
                    id: id.to_string(),
                    name: name.to_string(),
                },
                roles: std::collections::BTreeSet::new(),
            },
        );
    }

    fn data_stream(stream_account: Option<&str>) -> TriggerSpec {
        TriggerSpec {
            function: "worker".to_string(),
            function_account: Some("invoker".to_string()),
            event: TriggerEvent::DataStream(DataStreamEvent {
                stream: "/ru-central1/db/clicks".to_string(),
                database: "/ru-central1/db".to_string(),
                stream_account: stream_account.map(str::to_string),
                stream_account_id: None,
                batch: 100,
                cutoff: 5,
                invoke: InvokeSettings::default(),
            }),
        }
    }

    /// Sync a declared trigger and return the rule it was created with.
    async fn created_rule(
        provider: &InMemoryProvider,
        registries: &Registries,
        name: &str,
        spec: TriggerSpec,
    ) -> TriggerRule {
        let options = DeployOptions::default();
        let ctx = SyncContext {
            provider,
            resolver: registries,
            options: &options,
        };
        TriggerEntity::declared(ResourceKind::Trigger, name, spec)
            .sync(&ctx)
            .await
            .expect("sync");

        let mutations = provider.mutations().await;
        let Some(ProviderCall::CreateTrigger { request }) = mutations.first() else {
            panic!("expected create, got {mutations:?}");
        };
        request.rule.clone()
    }

    fn observed_trigger() -> TriggerInfo {
        TriggerInfo {
            id: "tr-old".to_string(),
            name: "worker-cron".to_string(),
            function_id: Some("fn-live".to_string()),
        }
    }

    #[tokio::test]
    async fn test_undeclared_trigger_is_deleted_once() {
        let provider = InMemoryProvider::from_snapshot(Snapshot {
            triggers: vec![observed_trigger()],
            ..Snapshot::default()
        });
        let registries = Registries::default();
        let options = DeployOptions::default();
        let ctx = SyncContext {
            provider: &provider,
            resolver: &registries,
            options: &options,
        };
        let entity =
            TriggerEntity::observed(ResourceKind::Trigger, "worker-cron", observed_trigger());

        assert_eq!(entity.sync(&ctx).await.expect("sync"), SyncOutcome::Deleted);
        assert_eq!(
            provider.mutations().await,
            vec![ProviderCall::DeleteTrigger {
                id: "tr-old".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn test_existing_trigger_is_replaced() {
        let provider = InMemoryProvider::from_snapshot(Snapshot {
            triggers: vec![observed_trigger()],
            ..Snapshot::default()
        });
        let registries = registries_with_function();
        let options = DeployOptions::default();
        let ctx = SyncContext {
            provider: &provider,
            resolver: &registries,
            options: &options,
        };
        let mut entity =
            TriggerEntity::observed(ResourceKind::Trigger, "worker-cron", observed_trigger());
        entity.set_new_state(cron(Some("invoker"))).expect("declare");

        let outcome = entity.sync(&ctx).await.expect("sync");

        let SyncOutcome::Replaced { id } = outcome else {
            panic!("expected replacement, got {outcome:?}");
        };
        assert_ne!(id, "tr-old");
        let mutations = provider.mutations().await;
        assert_eq!(mutations.len(), 2);
        assert_eq!(
            mutations.first(),
            Some(&ProviderCall::DeleteTrigger {
                id: "tr-old".to_string()
            })
        );
        let Some(ProviderCall::CreateTrigger { request }) = mutations.get(1) else {
            panic!("expected create, got {mutations:?}");
        };
        let invoke = request.rule.invoke();
        assert_eq!(invoke.function_id, "fn-live");
        assert_eq!(invoke.service_account_id, "sa-live");
        assert_eq!(invoke.function_tag, "$latest");
        assert_eq!(
            invoke.retry,
            Some(RetrySettings {
                attempts: 2,
                interval_secs: 30
            })
        );
    }

    #[tokio::test]
    async fn test_unresolvable_reference_keeps_old_trigger() {
        let provider = InMemoryProvider::from_snapshot(Snapshot {
            triggers: vec![observed_trigger()],
            ..Snapshot::default()
        });
        let registries = registries_with_function();
        let options = DeployOptions::default();
        let ctx = SyncContext {
            provider: &provider,
            resolver: &registries,
            options: &options,
        };
        let mut entity =
            TriggerEntity::observed(ResourceKind::Trigger, "worker-cron", observed_trigger());
        entity.set_new_state(cron(Some("nobody"))).expect("declare");

        let err = entity.sync(&ctx).await.expect_err("missing account");

        assert!(matches!(err, Error::MissingReference { .. }));
        assert!(provider.mutations().await.is_empty());
    }

    #[tokio::test]
    async fn test_invoking_account_is_required() {
        let provider = InMemoryProvider::new();
        let registries = registries_with_function();
        let options = DeployOptions::default();
        let ctx = SyncContext {
            provider: &provider,
            resolver: &registries,
            options: &options,
        };
        let entity = TriggerEntity::declared(ResourceKind::Trigger, "worker-cron", cron(None));

        assert!(matches!(
            entity.sync(&ctx).await,
            Err(Error::UnsetReference { .. })
        ));
    }

    #[tokio::test]
    async fn test_queue_trigger_resolves_queue_and_dead_letter() {
        let provider = InMemoryProvider::new();
        let mut registries = registries_with_function();
        registries.queues.observe(
            "jobs",
            QueueInfo {
                id: "mq-jobs".to_string(),
                name: "jobs".to_string(),
                url: None,
            },
        );
        registries.queues.observe(
            "failed",
            QueueInfo {
                id: "mq-failed".to_string(),
                name: "failed".to_string(),
                url: None,
            },
        );
        let options = DeployOptions::default();
        let ctx = SyncContext {
            provider: &provider,
            resolver: &registries,
            options: &options,
        };
        let spec = TriggerSpec {
            function: "worker".to_string(),
            function_account: Some("invoker".to_string()),
            event: TriggerEvent::MessageQueue(MessageQueueEvent {
                queue: Some("jobs".to_string()),
                queue_id: None,
                queue_account: None,
                queue_account_id: None,
                batch: 5,
                cutoff: 2,
                invoke: InvokeSettings {
                    dlq: Some("failed".to_string()),
                    ..InvokeSettings::default()
                },
            }),
        };
        let entity = TriggerEntity::declared(ResourceKind::Trigger, "worker-ymq", spec);

        entity.sync(&ctx).await.expect("sync");

        let mutations = provider.mutations().await;
        let Some(ProviderCall::CreateTrigger { request }) = mutations.first() else {
            panic!("expected create, got {mutations:?}");
        };
        let TriggerRule::MessageQueue {
            queue_id,
            service_account_id,
            invoke,
            ..
        } = &request.rule
        else {
            panic!("expected queue rule, got {:?}", request.rule);
        };
        assert_eq!(queue_id, "mq-jobs");
        assert_eq!(service_account_id, "sa-live");
        assert_eq!(
            invoke.dead_letter,
            Some(DeadLetterTarget {
                queue_id: "mq-failed".to_string(),
                service_account_id: "sa-live".to_string(),
            })
        );
    }

    #[tokio::test]
    async fn test_registry_trigger_resolves_registry_id() {
        let provider = InMemoryProvider::new();
        let mut registries = registries_with_function();
        registries.container_registries.observe(
            "images",
            RegistryInfo {
                id: "cr-live".to_string(),
                name: "images".to_string(),
            },
        );
        let spec = TriggerSpec {
            function: "worker".to_string(),
            function_account: Some("invoker".to_string()),
            event: TriggerEvent::ContainerRegistry(ContainerRegistryEvent {
                registry: Some("images".to_string()),
                registry_id: None,
                image_name: Some("app".to_string()),
                tag: None,
                events: vec![ImageEvent::CreateImage],
                invoke: InvokeSettings::default(),
            }),
        };

        let rule = created_rule(&provider, &registries, "worker-cr", spec).await;

        let TriggerRule::ContainerRegistry {
            registry_id,
            image_name,
            events,
            invoke,
            ..
        } = rule
        else {
            panic!("expected registry rule, got {rule:?}");
        };
        assert_eq!(registry_id, "cr-live");
        assert_eq!(image_name.as_deref(), Some("app"));
        assert_eq!(events, vec![ImageEvent::CreateImage]);
        assert_eq!(invoke.service_account_id, "sa-live");
    }

    #[tokio::test]
    async fn test_stream_trigger_reads_with_its_own_account() {
        let provider = InMemoryProvider::new();
        let mut registries = registries_with_function();
        observe_account(&mut registries, "reader", "sa-reader");

        let rule = created_rule(
            &provider,
            &registries,
            "worker-yds",
            data_stream(Some("reader")),
        )
        .await;

        let TriggerRule::DataStream {
            stream,
            service_account_id,
            batch_size,
            batch_cutoff_secs,
            invoke,
            ..
        } = rule
        else {
            panic!("expected data stream rule, got {rule:?}");
        };
        assert_eq!(stream, "/ru-central1/db/clicks");
        assert_eq!(service_account_id, "sa-reader");
        assert_eq!(invoke.service_account_id, "sa-live");
        assert_eq!((batch_size, batch_cutoff_secs), (100, 5));
    }

    #[tokio::test]
    async fn test_stream_trigger_requires_stream_account() {
        let provider = InMemoryProvider::new();
        let registries = registries_with_function();
        let options = DeployOptions::default();
        let ctx = SyncContext {
            provider: &provider,
            resolver: &registries,
            options: &options,
        };
        let entity =
            TriggerEntity::declared(ResourceKind::Trigger, "worker-yds", data_stream(None));

        let err = entity.sync(&ctx).await.expect_err("no stream account");

        assert!(matches!(
            err,
            Error::UnsetReference {
                kind: ResourceKind::ServiceAccount,
                ..
            }
        ));
        assert!(provider.mutations().await.is_empty());
    }

    #[tokio::test]
    async fn test_dead_letter_account_id_wins_over_name() {
        let provider = InMemoryProvider::new();
        let mut registries = registries_with_function();
        observe_account(&mut registries, "dlq-writer", "sa-writer");
        let mut spec = cron(Some("invoker"));
        if let TriggerEvent::Cron(event) = &mut spec.event {
            event.invoke.dlq_id = Some("mq-raw".to_string());
            event.invoke.dlq_account = Some("dlq-writer".to_string());
            event.invoke.dlq_account_id = Some("sa-raw".to_string());
        }

        let rule = created_rule(&provider, &registries, "worker-cron", spec).await;

        assert_eq!(
            rule.invoke().dead_letter,
            Some(DeadLetterTarget {
                queue_id: "mq-raw".to_string(),
                service_account_id: "sa-raw".to_string(),
            })
        );
    }
}
