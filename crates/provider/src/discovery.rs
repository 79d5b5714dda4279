//! Memoized discovery of the live account.
//!
//! Each listing is drained once per run and then served from memory, so
//! unrelated callers asking for the same resource type share one fetch.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use itertools::Itertools;
use tokio::sync::{Mutex, OnceCell};

use crate::error::Result;
use crate::provider::{drain_pages, Provider};
use crate::types::{
    ApiGatewayInfo, BucketInfo, FunctionInfo, QueueInfo, RegistryInfo, RoleBinding,
    ServiceAccountInfo, TriggerInfo,
};

/// Per-run cache of provider listings.
pub struct Discovery {
    provider: Arc<dyn Provider>,
    functions: OnceCell<Vec<FunctionInfo>>,
    triggers: OnceCell<Vec<TriggerInfo>>,
    service_accounts: OnceCell<Vec<ServiceAccountInfo>>,
    role_bindings: OnceCell<Vec<RoleBinding>>,
    queues: OnceCell<Vec<QueueInfo>>,
    buckets: OnceCell<Vec<BucketInfo>>,
    registries: OnceCell<Vec<RegistryInfo>>,
    gateways: Mutex<HashMap<String, Option<ApiGatewayInfo>>>,
}

impl Discovery {
    /// Create an empty cache in front of `provider`.
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self {
            provider,
            functions: OnceCell::new(),
            triggers: OnceCell::new(),
            service_accounts: OnceCell::new(),
            role_bindings: OnceCell::new(),
            queues: OnceCell::new(),
            buckets: OnceCell::new(),
            registries: OnceCell::new(),
            gateways: Mutex::new(HashMap::new()),
        }
    }

    /// The provider behind this cache.
    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    /// All functions in the account.
    ///
    /// # Errors
    ///
    /// Fails if any page of the listing fails.
    pub async fn functions(&self) -> Result<&[FunctionInfo]> {
        self.functions
            .get_or_try_init(|| drain_pages(|token| self.provider.list_functions(token)))
            .await
            .map(Vec::as_slice)
    }

    /// All triggers in the account.
    ///
    /// # Errors
    ///
    /// Fails if any page of the listing fails.
    pub async fn triggers(&self) -> Result<&[TriggerInfo]> {
        self.triggers
            .get_or_try_init(|| drain_pages(|token| self.provider.list_triggers(token)))
            .await
            .map(Vec::as_slice)
    }

    /// All service accounts in the account.
    ///
    /// # Errors
    ///
    /// Fails if any page of the listing fails.
    pub async fn service_accounts(&self) -> Result<&[ServiceAccountInfo]> {
        self.service_accounts
            .get_or_try_init(|| drain_pages(|token| self.provider.list_service_accounts(token)))
            .await
            .map(Vec::as_slice)
    }

    /// All role bindings in the account.
    ///
    /// # Errors
    ///
    /// Fails if any page of the listing fails.
    pub async fn role_bindings(&self) -> Result<&[RoleBinding]> {
        self.role_bindings
            .get_or_try_init(|| drain_pages(|token| self.provider.list_role_bindings(token)))
            .await
            .map(Vec::as_slice)
    }

    /// Roles granted to each subject, keyed by subject ID.
    ///
    /// # Errors
    ///
    /// Fails if the role binding listing fails.
    pub async fn roles_by_subject(&self) -> Result<BTreeMap<String, BTreeSet<String>>> {
        let bindings = self.role_bindings().await?;
        Ok(bindings
            .iter()
            .into_group_map_by(|binding| binding.subject_id.clone())
            .into_iter()
            .map(|(subject, group)| {
                let roles = group.into_iter().map(|b| b.role.clone()).collect();
                (subject, roles)
            })
            .collect())
    }

    /// All message queues in the account.
    ///
    /// # Errors
    ///
    /// Fails if any page of the listing fails.
    pub async fn queues(&self) -> Result<&[QueueInfo]> {
        self.queues
            .get_or_try_init(|| drain_pages(|token| self.provider.list_queues(token)))
            .await
            .map(Vec::as_slice)
    }

    /// All object storage buckets in the account.
    ///
    /// # Errors
    ///
    /// Fails if any page of the listing fails.
    pub async fn buckets(&self) -> Result<&[BucketInfo]> {
        self.buckets
            .get_or_try_init(|| drain_pages(|token| self.provider.list_buckets(token)))
            .await
            .map(Vec::as_slice)
    }

    /// All container registries in the account.
    ///
    /// # Errors
    ///
    /// Fails if any page of the listing fails.
    pub async fn registries(&self) -> Result<&[RegistryInfo]> {
        self.registries
            .get_or_try_init(|| drain_pages(|token| self.provider.list_registries(token)))
            .await
            .map(Vec::as_slice)
    }

    /// The API gateway called `name`, if it exists.
    ///
    /// # Errors
    ///
    /// Fails if the lookup fails; failures are not cached.
    pub async fn api_gateway(&self, name: &str) -> Result<Option<ApiGatewayInfo>> {
        let mut gateways = self.gateways.lock().await;
        if let Some(cached) = gateways.get(name) {
            return Ok(cached.clone());
        }
        let found = self.provider.get_api_gateway(name).await?;
        gateways.insert(name.to_string(), found.clone());
        Ok(found)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryProvider, ProviderCall, Snapshot};

    fn provider_with_queues(count: usize, page_size: usize) -> Arc<InMemoryProvider> {
        let snapshot = Snapshot {
            queues: (0..count)
                .map(|i| QueueInfo {
                    id: format!("q{i}"),
                    name: format!("queue-{i}"),
                    url: None,
                })
                .collect(),
            ..Snapshot::default()
        };
        Arc::new(InMemoryProvider::from_snapshot(snapshot).with_page_size(page_size))
    }

    #[tokio::test]
    async fn test_listing_drains_every_page() {
        let provider = provider_with_queues(7, 3);
        let discovery = Discovery::new(provider.clone());

        let queues = discovery.queues().await.expect("queues");
        assert_eq!(queues.len(), 7);

        let pages = provider
            .calls()
            .await
            .into_iter()
            .filter(|c| matches!(c, ProviderCall::List { operation: "list_queues", .. }))
            .count();
        assert_eq!(pages, 3);
    }

    #[tokio::test]
    async fn test_listing_is_memoized() {
        let provider = provider_with_queues(2, 10);
        let discovery = Discovery::new(provider.clone());

        discovery.queues().await.expect("first");
        discovery.queues().await.expect("second");

        assert_eq!(provider.calls().await.len(), 1);
    }

    #[tokio::test]
    async fn test_roles_grouped_by_subject() {
        let snapshot = Snapshot {
            role_bindings: vec![
                RoleBinding {
                    subject_id: "sa1".to_string(),
                    role: "editor".to_string(),
                },
                RoleBinding {
                    subject_id: "sa1".to_string(),
                    role: "viewer".to_string(),
                },
                RoleBinding {
                    subject_id: "sa2".to_string(),
                    role: "viewer".to_string(),
                },
            ],
            ..Snapshot::default()
        };
        let discovery = Discovery::new(Arc::new(InMemoryProvider::from_snapshot(snapshot)));

        let roles = discovery.roles_by_subject().await.expect("roles");
        assert_eq!(roles.get("sa1").map(BTreeSet::len), Some(2));
        assert_eq!(roles.get("sa2").map(BTreeSet::len), Some(1));
    }

    #[tokio::test]
    async fn test_gateway_lookup_cached_per_name() {
        let provider = Arc::new(InMemoryProvider::new());
        let discovery = Discovery::new(provider.clone());

        assert!(discovery.api_gateway("svc").await.expect("lookup").is_none());
        assert!(discovery.api_gateway("svc").await.expect("lookup").is_none());

        assert_eq!(provider.calls().await.len(), 1);
    }
}
