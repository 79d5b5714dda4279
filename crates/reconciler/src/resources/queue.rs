//! Message queues. Create-only: an existing queue is never modified.

use async_trait::async_trait;
use nimbus_provider::{QueueInfo, QueueRequest};

use crate::entity::{Entity, Lifecycle, SyncContext, SyncOutcome, Syncable};
use crate::error::Result;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueSpec {
    pub fifo: bool,
}

pub type QueueEntity = Entity<QueueInfo, QueueSpec>;

#[async_trait]
impl Syncable for QueueEntity {
    async fn sync(&self, ctx: &SyncContext<'_>) -> Result<SyncOutcome> {
        match self.lifecycle() {
            Lifecycle::Unmanaged(_) => Ok(super::unmanaged(self)),
            Lifecycle::Update { .. } => Ok(super::unchanged(self)),
            Lifecycle::Create(spec) => {
                let request = QueueRequest {
                    name: self.name().to_string(),
                    fifo: spec.fifo,
                };
                let created = ctx
                    .provider
                    .create_queue(&request)
                    .await
                    .map_err(self.provider_failure("create_queue"))?;
                super::created(self, created.id)
            }
        }
    }
}
