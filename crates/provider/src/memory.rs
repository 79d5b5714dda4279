//! In-memory provider for tests and snapshot-driven runs.
//!
//! Holds a complete account in memory, pages listings with offset tokens,
//! hands out deterministic IDs and journals every call so tests can assert on
//! exactly which mutations a run issued.

use std::collections::HashSet;

use async_trait::async_trait;
use nimbus_core::ResourceKind;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::{ProviderError, Result};
use crate::provider::Provider;
use crate::types::{
    ApiGatewayInfo, ApiGatewayRequest, BucketInfo, BucketRequest, Created, FunctionInfo,
    FunctionRequest, Page, QueueInfo, QueueRequest, RegistryInfo, RegistryRequest, RoleBinding,
    ServiceAccountInfo, ServiceAccountRequest, TriggerInfo, TriggerRequest,
};

const DEFAULT_PAGE_SIZE: usize = 100;

/// Serializable account contents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Snapshot {
    pub functions: Vec<FunctionInfo>,
    pub triggers: Vec<TriggerInfo>,
    pub service_accounts: Vec<ServiceAccountInfo>,
    pub role_bindings: Vec<RoleBinding>,
    pub queues: Vec<QueueInfo>,
    pub buckets: Vec<BucketInfo>,
    pub registries: Vec<RegistryInfo>,
    pub api_gateways: Vec<ApiGatewayInfo>,
}

/// One journaled provider call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "call", rename_all = "snake_case")]
pub enum ProviderCall {
    List {
        operation: &'static str,
        page_token: Option<String>,
    },
    GetApiGateway {
        name: String,
    },
    CreateServiceAccount {
        request: ServiceAccountRequest,
    },
    DeleteServiceAccount {
        id: String,
    },
    AddRoleBinding {
        account_id: String,
        role: String,
    },
    RemoveRoleBinding {
        account_id: String,
        role: String,
    },
    CreateQueue {
        request: QueueRequest,
    },
    CreateBucket {
        request: BucketRequest,
    },
    CreateRegistry {
        request: RegistryRequest,
    },
    PutObject {
        bucket: String,
        key: String,
        size: usize,
    },
    CreateFunction {
        request: FunctionRequest,
    },
    UpdateFunction {
        id: String,
        request: FunctionRequest,
    },
    CreateTrigger {
        request: TriggerRequest,
    },
    DeleteTrigger {
        id: String,
    },
    CreateApiGateway {
        request: ApiGatewayRequest,
    },
    UpdateApiGateway {
        id: String,
        request: ApiGatewayRequest,
    },
}

impl ProviderCall {
    /// Whether this call changes the account.
    #[must_use]
    pub const fn is_mutation(&self) -> bool {
        !matches!(self, Self::List { .. } | Self::GetApiGateway { .. })
    }

    /// Name of the provider operation, as used by failure injection.
    #[must_use]
    pub const fn operation(&self) -> &'static str {
        match self {
            Self::List { operation, .. } => *operation,
            Self::GetApiGateway { .. } => "get_api_gateway",
            Self::CreateServiceAccount { .. } => "create_service_account",
            Self::DeleteServiceAccount { .. } => "delete_service_account",
            Self::AddRoleBinding { .. } => "add_role_binding",
            Self::RemoveRoleBinding { .. } => "remove_role_binding",
            Self::CreateQueue { .. } => "create_queue",
            Self::CreateBucket { .. } => "create_bucket",
            Self::CreateRegistry { .. } => "create_registry",
            Self::PutObject { .. } => "put_object",
            Self::CreateFunction { .. } => "create_function",
            Self::UpdateFunction { .. } => "update_function",
            Self::CreateTrigger { .. } => "create_trigger",
            Self::DeleteTrigger { .. } => "delete_trigger",
            Self::CreateApiGateway { .. } => "create_api_gateway",
            Self::UpdateApiGateway { .. } => "update_api_gateway",
        }
    }
}

#[derive(Default)]
struct Account {
    snapshot: Snapshot,
    next_id: u64,
}

impl Account {
    fn allocate_id(&mut self, prefix: &str) -> String {
        self.next_id = self.next_id.saturating_add(1);
        format!("{prefix}{:04}", self.next_id)
    }
}

/// In-memory cloud account.
pub struct InMemoryProvider {
    account: Mutex<Account>,
    journal: Mutex<Vec<ProviderCall>>,
    failures: Mutex<HashSet<(String, String)>>,
    page_size: usize,
}

impl Default for InMemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryProvider {
    /// Create an empty account.
    #[must_use]
    pub fn new() -> Self {
        Self::from_snapshot(Snapshot::default())
    }

    /// Create an account pre-populated with `snapshot`.
    #[must_use]
    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        Self {
            account: Mutex::new(Account {
                snapshot,
                next_id: 0,
            }),
            journal: Mutex::new(Vec::new()),
            failures: Mutex::new(HashSet::new()),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Serve listings in pages of `page_size` items.
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Make `operation` fail whenever it targets `target` (a name or ID).
    ///
    /// A target of `"*"` fails every call to `operation`.
    pub async fn fail_on(&self, operation: impl Into<String>, target: impl Into<String>) {
        self.failures
            .lock()
            .await
            .insert((operation.into(), target.into()));
    }

    /// Every call made so far, in order.
    pub async fn calls(&self) -> Vec<ProviderCall> {
        self.journal.lock().await.clone()
    }

    /// Only the calls that changed the account.
    pub async fn mutations(&self) -> Vec<ProviderCall> {
        self.journal
            .lock()
            .await
            .iter()
            .filter(|call| call.is_mutation())
            .cloned()
            .collect()
    }

    /// Current account contents.
    pub async fn snapshot(&self) -> Snapshot {
        self.account.lock().await.snapshot.clone()
    }

    async fn record(&self, call: ProviderCall, target: &str) -> Result<()> {
        let operation = call.operation();
        self.journal.lock().await.push(call);

        let failures = self.failures.lock().await;
        let fails = failures.contains(&(operation.to_string(), target.to_string()))
            || failures.contains(&(operation.to_string(), "*".to_string()));
        if fails {
            return Err(ProviderError::rejected(
                operation,
                target,
                "injected failure",
            ));
        }
        Ok(())
    }

    async fn list<T: Clone>(
        &self,
        operation: &'static str,
        page_token: Option<String>,
        select: impl FnOnce(&Snapshot) -> &Vec<T>,
    ) -> Result<Page<T>> {
        self.record(
            ProviderCall::List {
                operation,
                page_token: page_token.clone(),
            },
            "",
        )
        .await?;
        let account = self.account.lock().await;
        paginate(select(&account.snapshot), page_token, self.page_size)
    }
}

/// Slice `items` into a page starting at the offset encoded in `page_token`.
fn paginate<T: Clone>(
    items: &[T],
    page_token: Option<String>,
    page_size: usize,
) -> Result<Page<T>> {
    let start = match page_token {
        Some(token) => token
            .parse::<usize>()
            .map_err(|_| ProviderError::InvalidPageToken { token })?,
        None => 0,
    };
    let end = start.saturating_add(page_size).min(items.len());
    let page = items.get(start..end).map(<[T]>::to_vec).unwrap_or_default();
    let next_page_token = (end < items.len()).then(|| end.to_string());
    Ok(Page {
        items: page,
        next_page_token,
    })
}

#[async_trait]
impl Provider for InMemoryProvider {
    async fn list_functions(&self, page_token: Option<String>) -> Result<Page<FunctionInfo>> {
        self.list("list_functions", page_token, |s| &s.functions).await
    }

    async fn list_triggers(&self, page_token: Option<String>) -> Result<Page<TriggerInfo>> {
        self.list("list_triggers", page_token, |s| &s.triggers).await
    }

    async fn list_service_accounts(
        &self,
        page_token: Option<String>,
    ) -> Result<Page<ServiceAccountInfo>> {
        self.list("list_service_accounts", page_token, |s| &s.service_accounts).await
    }

    async fn list_role_bindings(&self, page_token: Option<String>) -> Result<Page<RoleBinding>> {
        self.list("list_role_bindings", page_token, |s| &s.role_bindings).await
    }

    async fn list_queues(&self, page_token: Option<String>) -> Result<Page<QueueInfo>> {
        self.list("list_queues", page_token, |s| &s.queues).await
    }

    async fn list_buckets(&self, page_token: Option<String>) -> Result<Page<BucketInfo>> {
        self.list("list_buckets", page_token, |s| &s.buckets).await
    }

    async fn list_registries(&self, page_token: Option<String>) -> Result<Page<RegistryInfo>> {
        self.list("list_registries", page_token, |s| &s.registries).await
    }

    async fn get_api_gateway(&self, name: &str) -> Result<Option<ApiGatewayInfo>> {
        self.record(
            ProviderCall::GetApiGateway {
                name: name.to_string(),
            },
            name,
        )
        .await?;
        let account = self.account.lock().await;
        Ok(account
            .snapshot
            .api_gateways
            .iter()
            .find(|g| g.name == name)
            .cloned())
    }

    async fn create_service_account(&self, request: &ServiceAccountRequest) -> Result<Created> {
        self.record(
            ProviderCall::CreateServiceAccount {
                request: request.clone(),
            },
            &request.name,
        )
        .await?;
        let mut account = self.account.lock().await;
        if account
            .snapshot
            .service_accounts
            .iter()
            .any(|sa| sa.name == request.name)
        {
            return Err(ProviderError::already_exists(
                ResourceKind::ServiceAccount,
                &request.name,
            ));
        }
        let id = account.allocate_id("sa");
        account.snapshot.service_accounts.push(ServiceAccountInfo {
            id: id.clone(),
            name: request.name.clone(),
        });
        for role in &request.roles {
            account.snapshot.role_bindings.push(RoleBinding {
                subject_id: id.clone(),
                role: role.clone(),
            });
        }
        Ok(Created { id })
    }

    async fn delete_service_account(&self, id: &str) -> Result<()> {
        self.record(
            ProviderCall::DeleteServiceAccount { id: id.to_string() },
            id,
        )
        .await?;
        let mut account = self.account.lock().await;
        let before = account.snapshot.service_accounts.len();
        account.snapshot.service_accounts.retain(|sa| sa.id != id);
        if account.snapshot.service_accounts.len() == before {
            return Err(ProviderError::not_found(ResourceKind::ServiceAccount, id));
        }
        account.snapshot.role_bindings.retain(|b| b.subject_id != id);
        Ok(())
    }

    async fn add_role_binding(&self, account_id: &str, role: &str) -> Result<()> {
        self.record(
            ProviderCall::AddRoleBinding {
                account_id: account_id.to_string(),
                role: role.to_string(),
            },
            account_id,
        )
        .await?;
        let mut account = self.account.lock().await;
        let binding = RoleBinding {
            subject_id: account_id.to_string(),
            role: role.to_string(),
        };
        if !account.snapshot.role_bindings.contains(&binding) {
            account.snapshot.role_bindings.push(binding);
        }
        Ok(())
    }

    async fn remove_role_binding(&self, account_id: &str, role: &str) -> Result<()> {
        self.record(
            ProviderCall::RemoveRoleBinding {
                account_id: account_id.to_string(),
                role: role.to_string(),
            },
            account_id,
        )
        .await?;
        let mut account = self.account.lock().await;
        account
            .snapshot
            .role_bindings
            .retain(|b| !(b.subject_id == account_id && b.role == role));
        Ok(())
    }

    async fn create_queue(&self, request: &QueueRequest) -> Result<Created> {
        self.record(
            ProviderCall::CreateQueue {
                request: request.clone(),
            },
            &request.name,
        )
        .await?;
        let mut account = self.account.lock().await;
        let id = account.allocate_id("mq");
        account.snapshot.queues.push(QueueInfo {
            id: id.clone(),
            name: request.name.clone(),
            url: Some(format!("https://message-queue.local/{}", request.name)),
        });
        Ok(Created { id })
    }

    async fn create_bucket(&self, request: &BucketRequest) -> Result<Created> {
        self.record(
            ProviderCall::CreateBucket {
                request: request.clone(),
            },
            &request.name,
        )
        .await?;
        let mut account = self.account.lock().await;
        if account.snapshot.buckets.iter().any(|b| b.name == request.name) {
            return Err(ProviderError::already_exists(
                ResourceKind::ObjectStorageBucket,
                &request.name,
            ));
        }
        // Bucket names are globally unique and double as their ID.
        let id = request.name.clone();
        account.snapshot.buckets.push(BucketInfo {
            id: id.clone(),
            name: request.name.clone(),
        });
        Ok(Created { id })
    }

    async fn create_registry(&self, request: &RegistryRequest) -> Result<Created> {
        self.record(
            ProviderCall::CreateRegistry {
                request: request.clone(),
            },
            &request.name,
        )
        .await?;
        let mut account = self.account.lock().await;
        let id = account.allocate_id("cr");
        account.snapshot.registries.push(RegistryInfo {
            id: id.clone(),
            name: request.name.clone(),
        });
        Ok(Created { id })
    }

    async fn put_object(&self, bucket: &str, key: &str, content: &[u8]) -> Result<()> {
        self.record(
            ProviderCall::PutObject {
                bucket: bucket.to_string(),
                key: key.to_string(),
                size: content.len(),
            },
            key,
        )
        .await
    }

    async fn create_function(&self, request: &FunctionRequest) -> Result<Created> {
        self.record(
            ProviderCall::CreateFunction {
                request: request.clone(),
            },
            &request.name,
        )
        .await?;
        let mut account = self.account.lock().await;
        let id = account.allocate_id("fn");
        account.snapshot.functions.push(FunctionInfo {
            id: id.clone(),
            name: request.name.clone(),
            http_invoke_url: Some(format!("https://functions.local/{id}")),
        });
        Ok(Created { id })
    }

    async fn update_function(&self, id: &str, request: &FunctionRequest) -> Result<()> {
        self.record(
            ProviderCall::UpdateFunction {
                id: id.to_string(),
                request: request.clone(),
            },
            id,
        )
        .await?;
        let account = self.account.lock().await;
        if account.snapshot.functions.iter().any(|f| f.id == id) {
            Ok(())
        } else {
            Err(ProviderError::not_found(ResourceKind::Function, id))
        }
    }

    async fn create_trigger(&self, request: &TriggerRequest) -> Result<Created> {
        self.record(
            ProviderCall::CreateTrigger {
                request: request.clone(),
            },
            &request.name,
        )
        .await?;
        let mut account = self.account.lock().await;
        if account.snapshot.triggers.iter().any(|t| t.name == request.name) {
            return Err(ProviderError::already_exists(
                ResourceKind::Trigger,
                &request.name,
            ));
        }
        let id = account.allocate_id("tr");
        account.snapshot.triggers.push(TriggerInfo {
            id: id.clone(),
            name: request.name.clone(),
            function_id: Some(request.rule.invoke().function_id.clone()),
        });
        Ok(Created { id })
    }

    async fn delete_trigger(&self, id: &str) -> Result<()> {
        self.record(ProviderCall::DeleteTrigger { id: id.to_string() }, id)
            .await?;
        let mut account = self.account.lock().await;
        let before = account.snapshot.triggers.len();
        account.snapshot.triggers.retain(|t| t.id != id);
        if account.snapshot.triggers.len() == before {
            return Err(ProviderError::not_found(ResourceKind::Trigger, id));
        }
        Ok(())
    }

    async fn create_api_gateway(&self, request: &ApiGatewayRequest) -> Result<Created> {
        self.record(
            ProviderCall::CreateApiGateway {
                request: request.clone(),
            },
            &request.name,
        )
        .await?;
        let mut account = self.account.lock().await;
        let id = account.allocate_id("gw");
        account.snapshot.api_gateways.push(ApiGatewayInfo {
            id: id.clone(),
            name: request.name.clone(),
            domain: Some(format!("{id}.apigw.local")),
        });
        Ok(Created { id })
    }

    async fn update_api_gateway(&self, id: &str, request: &ApiGatewayRequest) -> Result<()> {
        self.record(
            ProviderCall::UpdateApiGateway {
                id: id.to_string(),
                request: request.clone(),
            },
            id,
        )
        .await?;
        let account = self.account.lock().await;
        if account.snapshot.api_gateways.iter().any(|g| g.id == id) {
            Ok(())
        } else {
            Err(ProviderError::not_found(ResourceKind::ApiGateway, id))
        }
    }
}
