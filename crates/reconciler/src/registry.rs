//! Name-keyed entity collections.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use nimbus_core::ResourceKind;
use nimbus_provider::{BucketInfo, FunctionInfo, QueueInfo, RegistryInfo, TriggerInfo};
use tracing::warn;

use crate::entity::{Entity, Observed};
use crate::error::Result;
use crate::resolver::Resolver;
use crate::resources::{
    AccountEntity, AccountSpec, BucketEntity, BucketSpec, FunctionEntity, FunctionSpec,
    GatewayEntity, ObservedAccount, QueueEntity, QueueSpec, RegistryEntity, RegistrySpec,
    TriggerEntity, TriggerSpec,
};

/// All entities of one kind, iterated in name order.
pub struct Registry<O, D> {
    kind: ResourceKind,
    entries: BTreeMap<String, Entity<O, D>>,
}

impl<O: Observed, D> Registry<O, D> {
    pub const fn new(kind: ResourceKind) -> Self {
        Self {
            kind,
            entries: BTreeMap::new(),
        }
    }

    pub const fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Register a discovered resource.
    ///
    /// The provider does not always enforce unique names; only the first
    /// resource seen under a name is managed.
    pub fn observe(&mut self, name: impl Into<String>, initial: O) {
        match self.entries.entry(name.into()) {
            Entry::Vacant(slot) => {
                let entity = Entity::observed(self.kind, slot.key().clone(), initial);
                slot.insert(entity);
            }
            Entry::Occupied(slot) => {
                warn!(
                    kind = %self.kind,
                    name = %slot.key(),
                    ignored_id = initial.id(),
                    "duplicate name in account, ignoring"
                );
            }
        }
    }

    /// Attach desired state to `name`, creating the entity if discovery did
    /// not see it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StateAlreadySet`](crate::Error::StateAlreadySet) if
    /// `name` was already declared.
    pub fn declare(&mut self, name: impl Into<String>, desired: D) -> Result<&Entity<O, D>> {
        match self.entries.entry(name.into()) {
            Entry::Vacant(slot) => {
                let entity = Entity::declared(self.kind, slot.key().clone(), desired);
                Ok(slot.insert(entity))
            }
            Entry::Occupied(slot) => {
                let entity = slot.into_mut();
                entity.set_new_state(desired)?;
                Ok(entity)
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&Entity<O, D>> {
        self.entries.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entity<O, D>> {
        self.entries.values()
    }

    /// Current ID of `name`, if it exists or was created this run.
    pub fn id_of(&self, name: &str) -> Option<String> {
        self.get(name).and_then(Entity::id).map(str::to_string)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Every registry of one deploy run.
pub struct Registries {
    pub accounts: Registry<ObservedAccount, AccountSpec>,
    pub queues: Registry<QueueInfo, QueueSpec>,
    pub buckets: Registry<BucketInfo, BucketSpec>,
    pub container_registries: Registry<RegistryInfo, RegistrySpec>,
    pub functions: Registry<FunctionInfo, FunctionSpec>,
    pub triggers: Registry<TriggerInfo, TriggerSpec>,
    pub gateway: Option<GatewayEntity>,
}

impl Default for Registries {
    fn default() -> Self {
        Self {
            accounts: Registry::new(ResourceKind::ServiceAccount),
            queues: Registry::new(ResourceKind::MessageQueue),
            buckets: Registry::new(ResourceKind::ObjectStorageBucket),
            container_registries: Registry::new(ResourceKind::ContainerRegistry),
            functions: Registry::new(ResourceKind::Function),
            triggers: Registry::new(ResourceKind::Trigger),
            gateway: None,
        }
    }
}

impl Registries {
    pub fn account(&self, name: &str) -> Option<&AccountEntity> {
        self.accounts.get(name)
    }

    pub fn queue(&self, name: &str) -> Option<&QueueEntity> {
        self.queues.get(name)
    }

    pub fn bucket(&self, name: &str) -> Option<&BucketEntity> {
        self.buckets.get(name)
    }

    pub fn container_registry(&self, name: &str) -> Option<&RegistryEntity> {
        self.container_registries.get(name)
    }

    pub fn function(&self, name: &str) -> Option<&FunctionEntity> {
        self.functions.get(name)
    }

    pub fn trigger(&self, name: &str) -> Option<&TriggerEntity> {
        self.triggers.get(name)
    }

    /// Total number of entities across every kind.
    pub fn len(&self) -> usize {
        self.accounts.len()
            + self.queues.len()
            + self.buckets.len()
            + self.container_registries.len()
            + self.functions.len()
            + self.triggers.len()
            + usize::from(self.gateway.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Resolver for Registries {
    fn function_id(&self, name: &str) -> Option<String> {
        self.functions.id_of(name)
    }

    fn account_id(&self, name: &str) -> Option<String> {
        self.accounts.id_of(name)
    }

    fn queue_id(&self, name: &str) -> Option<String> {
        self.queues.id_of(name)
    }

    fn bucket_id(&self, name: &str) -> Option<String> {
        self.buckets.id_of(name)
    }

    fn registry_id(&self, name: &str) -> Option<String> {
        self.container_registries.id_of(name)
    }
}
