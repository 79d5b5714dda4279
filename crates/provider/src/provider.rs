//! Provider trait, pagination draining and a tracing wrapper.

use std::collections::HashSet;
use std::future::Future;

use async_trait::async_trait;

use crate::error::{ProviderError, Result};
use crate::types::{
    ApiGatewayInfo, ApiGatewayRequest, BucketInfo, BucketRequest, Created, FunctionInfo,
    FunctionRequest, Page, QueueInfo, QueueRequest, RegistryInfo, RegistryRequest, RoleBinding,
    ServiceAccountInfo, ServiceAccountRequest, TriggerInfo, TriggerRequest,
};

/// Trait for cloud account backends.
///
/// Listing calls are paged: pass `None` for the first page and the returned
/// `next_page_token` for the following ones.
#[async_trait]
pub trait Provider: Send + Sync {
    async fn list_functions(&self, page_token: Option<String>) -> Result<Page<FunctionInfo>>;

    async fn list_triggers(&self, page_token: Option<String>) -> Result<Page<TriggerInfo>>;

    async fn list_service_accounts(
        &self,
        page_token: Option<String>,
    ) -> Result<Page<ServiceAccountInfo>>;

    async fn list_role_bindings(&self, page_token: Option<String>) -> Result<Page<RoleBinding>>;

    async fn list_queues(&self, page_token: Option<String>) -> Result<Page<QueueInfo>>;

    async fn list_buckets(&self, page_token: Option<String>) -> Result<Page<BucketInfo>>;

    async fn list_registries(&self, page_token: Option<String>) -> Result<Page<RegistryInfo>>;

    /// Look up the API gateway with the given name.
    async fn get_api_gateway(&self, name: &str) -> Result<Option<ApiGatewayInfo>>;

    async fn create_service_account(&self, request: &ServiceAccountRequest) -> Result<Created>;

    async fn delete_service_account(&self, id: &str) -> Result<()>;

    async fn add_role_binding(&self, account_id: &str, role: &str) -> Result<()>;

    async fn remove_role_binding(&self, account_id: &str, role: &str) -> Result<()>;

    async fn create_queue(&self, request: &QueueRequest) -> Result<Created>;

    async fn create_bucket(&self, request: &BucketRequest) -> Result<Created>;

    async fn create_registry(&self, request: &RegistryRequest) -> Result<Created>;

    /// Upload an object (used for artifacts too large to inline).
    async fn put_object(&self, bucket: &str, key: &str, content: &[u8]) -> Result<()>;

    async fn create_function(&self, request: &FunctionRequest) -> Result<Created>;

    /// Publish a new version of an existing function.
    async fn update_function(&self, id: &str, request: &FunctionRequest) -> Result<()>;

    async fn create_trigger(&self, request: &TriggerRequest) -> Result<Created>;

    async fn delete_trigger(&self, id: &str) -> Result<()>;

    async fn create_api_gateway(&self, request: &ApiGatewayRequest) -> Result<Created>;

    async fn update_api_gateway(&self, id: &str, request: &ApiGatewayRequest) -> Result<()>;
}

/// Follow page tokens until the listing is exhausted.
///
/// A partially drained listing is never returned: any page failure fails the
/// whole drain.
///
/// # Errors
///
/// Propagates the first page error, and returns
/// [`ProviderError::PaginationLoop`] if the provider hands back a token it
/// already returned.
pub async fn drain_pages<T, F, Fut>(mut fetch: F) -> Result<Vec<T>>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<Page<T>>>,
{
    let mut items = Vec::new();
    let mut seen = HashSet::new();
    let mut token = None;

    loop {
        let page = fetch(token).await?;
        items.extend(page.items);

        match page.next_page_token {
            Some(next) if next.is_empty() => break,
            Some(next) => {
                if !seen.insert(next.clone()) {
                    return Err(ProviderError::PaginationLoop { token: next });
                }
                token = Some(next);
            }
            None => break,
        }
    }

    Ok(items)
}

/// A wrapper that adds tracing to a provider.
pub struct TracingProvider<P: Provider> {
    inner: P,
}

impl<P: Provider> TracingProvider<P> {
    /// Create a new tracing provider.
    pub const fn new(inner: P) -> Self {
        Self { inner }
    }

    /// Access the wrapped provider.
    pub const fn inner(&self) -> &P {
        &self.inner
    }
}

fn traced<T>(operation: &str, target: &str, result: Result<T>) -> Result<T> {
    if let Err(ref e) = result {
        tracing::debug!(operation, target, error = %e, "Provider call failed");
    }
    result
}

#[async_trait]
impl<P: Provider> Provider for TracingProvider<P> {
    async fn list_functions(&self, page_token: Option<String>) -> Result<Page<FunctionInfo>> {
        tracing::debug!(page_token = ?page_token, "Listing functions");
        traced("list_functions", "", self.inner.list_functions(page_token).await)
    }

    async fn list_triggers(&self, page_token: Option<String>) -> Result<Page<TriggerInfo>> {
        tracing::debug!(page_token = ?page_token, "Listing triggers");
        traced("list_triggers", "", self.inner.list_triggers(page_token).await)
    }

    async fn list_service_accounts(
        &self,
        page_token: Option<String>,
    ) -> Result<Page<ServiceAccountInfo>> {
        tracing::debug!(page_token = ?page_token, "Listing service accounts");
        traced(
            "list_service_accounts",
            "",
            self.inner.list_service_accounts(page_token).await,
        )
    }

    async fn list_role_bindings(&self, page_token: Option<String>) -> Result<Page<RoleBinding>> {
        tracing::debug!(page_token = ?page_token, "Listing role bindings");
        traced(
            "list_role_bindings",
            "",
            self.inner.list_role_bindings(page_token).await,
        )
    }

    async fn list_queues(&self, page_token: Option<String>) -> Result<Page<QueueInfo>> {
        tracing::debug!(page_token = ?page_token, "Listing message queues");
        traced("list_queues", "", self.inner.list_queues(page_token).await)
    }

    async fn list_buckets(&self, page_token: Option<String>) -> Result<Page<BucketInfo>> {
        tracing::debug!(page_token = ?page_token, "Listing buckets");
        traced("list_buckets", "", self.inner.list_buckets(page_token).await)
    }

    async fn list_registries(&self, page_token: Option<String>) -> Result<Page<RegistryInfo>> {
        tracing::debug!(page_token = ?page_token, "Listing container registries");
        traced("list_registries", "", self.inner.list_registries(page_token).await)
    }

    async fn get_api_gateway(&self, name: &str) -> Result<Option<ApiGatewayInfo>> {
        tracing::debug!(name, "Looking up api gateway");
        traced("get_api_gateway", name, self.inner.get_api_gateway(name).await)
    }

    async fn create_service_account(&self, request: &ServiceAccountRequest) -> Result<Created> {
        tracing::debug!(
            name = %request.name,
            roles = request.roles.len(),
            "Creating service account"
        );
        traced(
            "create_service_account",
            &request.name,
            self.inner.create_service_account(request).await,
        )
    }

    async fn delete_service_account(&self, id: &str) -> Result<()> {
        tracing::debug!(id, "Deleting service account");
        traced(
            "delete_service_account",
            id,
            self.inner.delete_service_account(id).await,
        )
    }

    async fn add_role_binding(&self, account_id: &str, role: &str) -> Result<()> {
        tracing::debug!(account_id, role, "Adding role binding");
        traced(
            "add_role_binding",
            account_id,
            self.inner.add_role_binding(account_id, role).await,
        )
    }

    async fn remove_role_binding(&self, account_id: &str, role: &str) -> Result<()> {
        tracing::debug!(account_id, role, "Removing role binding");
        traced(
            "remove_role_binding",
            account_id,
            self.inner.remove_role_binding(account_id, role).await,
        )
    }

    async fn create_queue(&self, request: &QueueRequest) -> Result<Created> {
        tracing::debug!(name = %request.name, fifo = request.fifo, "Creating message queue");
        traced("create_queue", &request.name, self.inner.create_queue(request).await)
    }

    async fn create_bucket(&self, request: &BucketRequest) -> Result<Created> {
        tracing::debug!(name = %request.name, "Creating bucket");
        traced("create_bucket", &request.name, self.inner.create_bucket(request).await)
    }

    async fn create_registry(&self, request: &RegistryRequest) -> Result<Created> {
        tracing::debug!(name = %request.name, "Creating container registry");
        traced(
            "create_registry",
            &request.name,
            self.inner.create_registry(request).await,
        )
    }

    async fn put_object(&self, bucket: &str, key: &str, content: &[u8]) -> Result<()> {
        tracing::debug!(bucket, key, size = content.len(), "Uploading object");
        traced("put_object", key, self.inner.put_object(bucket, key, content).await)
    }

    async fn create_function(&self, request: &FunctionRequest) -> Result<Created> {
        tracing::debug!(name = %request.name, runtime = %request.runtime, "Creating function");
        traced(
            "create_function",
            &request.name,
            self.inner.create_function(request).await,
        )
    }

    async fn update_function(&self, id: &str, request: &FunctionRequest) -> Result<()> {
        tracing::debug!(id, name = %request.name, "Updating function");
        traced(
            "update_function",
            id,
            self.inner.update_function(id, request).await,
        )
    }

    async fn create_trigger(&self, request: &TriggerRequest) -> Result<Created> {
        tracing::debug!(name = %request.name, "Creating trigger");
        traced(
            "create_trigger",
            &request.name,
            self.inner.create_trigger(request).await,
        )
    }

    async fn delete_trigger(&self, id: &str) -> Result<()> {
        tracing::debug!(id, "Deleting trigger");
        traced("delete_trigger", id, self.inner.delete_trigger(id).await)
    }

    async fn create_api_gateway(&self, request: &ApiGatewayRequest) -> Result<Created> {
        tracing::debug!(name = %request.name, "Creating api gateway");
        traced(
            "create_api_gateway",
            &request.name,
            self.inner.create_api_gateway(request).await,
        )
    }

    async fn update_api_gateway(&self, id: &str, request: &ApiGatewayRequest) -> Result<()> {
        tracing::debug!(id, name = %request.name, "Updating api gateway");
        traced(
            "update_api_gateway",
            id,
            self.inner.update_api_gateway(id, request).await,
        )
    }
}
