//! Container registries. Create-only.

use async_trait::async_trait;
use nimbus_provider::{RegistryInfo, RegistryRequest};

use crate::entity::{Entity, Lifecycle, SyncContext, SyncOutcome, Syncable};
use crate::error::Result;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistrySpec;

pub type RegistryEntity = Entity<RegistryInfo, RegistrySpec>;

#[async_trait]
impl Syncable for RegistryEntity {
    async fn sync(&self, ctx: &SyncContext<'_>) -> Result<SyncOutcome> {
        match self.lifecycle() {
            Lifecycle::Unmanaged(_) => Ok(super::unmanaged(self)),
            Lifecycle::Update { .. } => Ok(super::unchanged(self)),
            Lifecycle::Create(RegistrySpec) => {
                let request = RegistryRequest {
                    name: self.name().to_string(),
                };
                let created = ctx
                    .provider
                    .create_registry(&request)
                    .await
                    .map_err(self.provider_failure("create_registry"))?;
                super::created(self, created.id)
            }
        }
    }
}
