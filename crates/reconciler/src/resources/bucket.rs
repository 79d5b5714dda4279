//! Object storage buckets. Create-only.

use async_trait::async_trait;
use nimbus_provider::{BucketInfo, BucketRequest};

use crate::entity::{Entity, Lifecycle, SyncContext, SyncOutcome, Syncable};
use crate::error::Result;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BucketSpec;

pub type BucketEntity = Entity<BucketInfo, BucketSpec>;

#[async_trait]
impl Syncable for BucketEntity {
    async fn sync(&self, ctx: &SyncContext<'_>) -> Result<SyncOutcome> {
        match self.lifecycle() {
            Lifecycle::Unmanaged(_) => Ok(super::unmanaged(self)),
            Lifecycle::Update { .. } => Ok(super::unchanged(self)),
            Lifecycle::Create(BucketSpec) => {
                let request = BucketRequest {
                    name: self.name().to_string(),
                };
                let created = ctx
                    .provider
                    .create_bucket(&request)
                    .await
                    .map_err(self.provider_failure("create_bucket"))?;
                super::created(self, created.id)
            }
        }
    }
}
