//! Service accounts and their folder role bindings.

use std::collections::BTreeSet;

use async_trait::async_trait;
use nimbus_provider::{ServiceAccountInfo, ServiceAccountRequest};
use tracing::{debug, info};

use crate::config::RoleUpdatePolicy;
use crate::entity::{Entity, Lifecycle, Observed, SyncContext, SyncOutcome, Syncable};
use crate::error::Result;

/// A discovered service account together with the roles bound to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedAccount {
    pub info: ServiceAccountInfo,
    pub roles: BTreeSet<String>,
}

impl Observed for ObservedAccount {
    fn id(&self) -> &str {
        &self.info.id
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountSpec {
    pub roles: BTreeSet<String>,
}

pub type AccountEntity = Entity<ObservedAccount, AccountSpec>;

impl AccountEntity {
    fn request(&self, spec: &AccountSpec) -> ServiceAccountRequest {
        ServiceAccountRequest {
            name: self.name().to_string(),
            roles: spec.roles.clone(),
        }
    }

    async fn update_bindings(
        &self,
        ctx: &SyncContext<'_>,
        initial: &ObservedAccount,
        desired: &AccountSpec,
    ) -> Result<SyncOutcome> {
        let id = initial.id();
        for role in desired.roles.difference(&initial.roles) {
            debug!(name = self.name(), id, role = %role, "granting role");
            ctx.provider
                .add_role_binding(id, role)
                .await
                .map_err(self.provider_failure("add_role_binding"))?;
        }
        for role in initial.roles.difference(&desired.roles) {
            debug!(name = self.name(), id, role = %role, "revoking role");
            ctx.provider
                .remove_role_binding(id, role)
                .await
                .map_err(self.provider_failure("remove_role_binding"))?;
        }
        Ok(super::updated(self))
    }

    async fn recreate(
        &self,
        ctx: &SyncContext<'_>,
        initial: &ObservedAccount,
        desired: &AccountSpec,
    ) -> Result<SyncOutcome> {
        info!(name = self.name(), id = initial.id(), "roles changed, recreating");
        ctx.provider
            .delete_service_account(initial.id())
            .await
            .map_err(self.provider_failure("delete_service_account"))?;
        let created = ctx
            .provider
            .create_service_account(&self.request(desired))
            .await
            .map_err(self.provider_failure("create_service_account"))?;
        super::replaced(self, created.id)
    }
}

#[async_trait]
impl Syncable for AccountEntity {
    async fn sync(&self, ctx: &SyncContext<'_>) -> Result<SyncOutcome> {
        match self.lifecycle() {
            Lifecycle::Unmanaged(_) => Ok(super::unmanaged(self)),
            Lifecycle::Create(desired) => {
                let created = ctx
                    .provider
                    .create_service_account(&self.request(desired))
                    .await
                    .map_err(self.provider_failure("create_service_account"))?;
                super::created(self, created.id)
            }
            Lifecycle::Update { initial, desired } => {
                if initial.roles == desired.roles {
                    return Ok(super::unchanged(self));
                }
                match ctx.options.role_update {
                    RoleUpdatePolicy::Diff => self.update_bindings(ctx, initial, desired).await,
                    RoleUpdatePolicy::Recreate => self.recreate(ctx, initial, desired).await,
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use nimbus_core::ResourceKind;
    use nimbus_provider::{InMemoryProvider, ProviderCall, RoleBinding, Snapshot};

    use super::*;
    use crate::config::DeployOptions;
    use crate::registry::Registries;

    fn roles(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| (*s).to_string()).collect()
    }

    fn observed(id: &str, names: &[&str]) -> ObservedAccount {
        ObservedAccount {
            info: ServiceAccountInfo {
                id: id.to_string(),
                name: "runner".to_string(),
            },
            roles: roles(names),
        }
    }

    fn provider_with_account() -> InMemoryProvider {
        InMemoryProvider::from_snapshot(Snapshot {
            service_accounts: vec![ServiceAccountInfo {
                id: "sa1".to_string(),
                name: "runner".to_string(),
            }],
            role_bindings: vec![RoleBinding {
                subject_id: "sa1".to_string(),
                role: "viewer".to_string(),
            }],
            ..Snapshot::default()
        })
    }

    async fn sync(
        entity: &AccountEntity,
        provider: &InMemoryProvider,
        options: &DeployOptions,
    ) -> Result<SyncOutcome> {
        let registries = Registries::default();
        let ctx = SyncContext {
            provider,
            resolver: &registries,
            options,
        };
        entity.sync(&ctx).await
    }

    #[tokio::test]
    async fn test_equal_roles_make_no_calls() {
        let provider = provider_with_account();
        let mut entity = AccountEntity::observed(
            ResourceKind::ServiceAccount,
            "runner",
            observed("sa1", &["viewer"]),
        );
        entity
            .set_new_state(AccountSpec {
                roles: roles(&["viewer"]),
            })
            .expect("declare");

        let outcome = sync(&entity, &provider, &DeployOptions::default())
            .await
            .expect("sync");

        assert_eq!(outcome, SyncOutcome::Unchanged);
        assert!(provider.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_role_diff_keeps_account_id() {
        let provider = provider_with_account();
        let mut entity = AccountEntity::observed(
            ResourceKind::ServiceAccount,
            "runner",
            observed("sa1", &["viewer"]),
        );
        entity
            .set_new_state(AccountSpec {
                roles: roles(&["editor"]),
            })
            .expect("declare");

        let outcome = sync(&entity, &provider, &DeployOptions::default())
            .await
            .expect("sync");

        assert_eq!(outcome, SyncOutcome::Updated);
        assert_eq!(entity.id(), Some("sa1"));
        assert_eq!(
            provider.mutations().await,
            vec![
                ProviderCall::AddRoleBinding {
                    account_id: "sa1".to_string(),
                    role: "editor".to_string(),
                },
                ProviderCall::RemoveRoleBinding {
                    account_id: "sa1".to_string(),
                    role: "viewer".to_string(),
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_recreate_policy_replaces_account() {
        let provider = provider_with_account();
        let options = DeployOptions {
            role_update: RoleUpdatePolicy::Recreate,
            ..DeployOptions::default()
        };
        let mut entity = AccountEntity::observed(
            ResourceKind::ServiceAccount,
            "runner",
            observed("sa1", &["viewer"]),
        );
        entity
            .set_new_state(AccountSpec {
                roles: roles(&["editor"]),
            })
            .expect("declare");

        let outcome = sync(&entity, &provider, &options).await.expect("sync");

        let SyncOutcome::Replaced { id } = outcome else {
            panic!("expected replacement, got {outcome:?}");
        };
        assert_ne!(id, "sa1");
        assert_eq!(entity.id(), Some(id.as_str()));
        assert_eq!(provider.mutations().await.len(), 2);
    }

    #[tokio::test]
    async fn test_create_assigns_id() {
        let provider = InMemoryProvider::new();
        let entity = AccountEntity::declared(
            ResourceKind::ServiceAccount,
            "runner",
            AccountSpec {
                roles: roles(&["editor"]),
            },
        );

        let outcome = sync(&entity, &provider, &DeployOptions::default())
            .await
            .expect("sync");

        assert!(matches!(outcome, SyncOutcome::Created { .. }));
        assert!(entity.id().is_some());
        let snapshot = provider.snapshot().await;
        assert_eq!(snapshot.role_bindings.len(), 1);
    }

    #[tokio::test]
    async fn test_provider_failure_names_operation() {
        let provider = InMemoryProvider::new();
        provider.fail_on("create_service_account", "runner").await;
        let entity =
            AccountEntity::declared(ResourceKind::ServiceAccount, "runner", AccountSpec::default());

        let err = sync(&entity, &provider, &DeployOptions::default())
            .await
            .expect_err("injected");

        assert!(err.to_string().contains("create_service_account"));
        assert_eq!(entity.id(), None);
    }
}
