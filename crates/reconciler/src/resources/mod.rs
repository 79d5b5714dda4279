//! Per-kind sync policies.
//!
//! Each submodule defines the desired-state type for one resource kind and
//! implements [`Syncable`](crate::entity::Syncable) for its entity.

use tracing::info;

use crate::entity::{Entity, Observed, SyncOutcome};
use crate::error::Result;

pub mod account;
pub mod bucket;
pub mod container_registry;
pub mod function;
pub mod gateway;
pub mod queue;
pub mod trigger;

pub use account::{AccountEntity, AccountSpec, ObservedAccount};
pub use bucket::{BucketEntity, BucketSpec};
pub use container_registry::{RegistryEntity, RegistrySpec};
pub use function::{Artifact, FunctionEntity, FunctionSpec};
pub use gateway::{GatewayEntity, GatewaySpec};
pub use queue::{QueueEntity, QueueSpec};
pub use trigger::{TriggerEntity, TriggerSpec};

/// Observed but not declared: leave it alone.
fn unmanaged<O: Observed, D>(entity: &Entity<O, D>) -> SyncOutcome {
    info!(
        kind = %entity.kind(),
        name = entity.name(),
        id = entity.id().unwrap_or_default(),
        "not declared, leaving unmanaged"
    );
    SyncOutcome::Unmanaged
}

fn unchanged<O: Observed, D>(entity: &Entity<O, D>) -> SyncOutcome {
    info!(
        kind = %entity.kind(),
        name = entity.name(),
        id = entity.id().unwrap_or_default(),
        "up to date"
    );
    SyncOutcome::Unchanged
}

/// Record the ID of a freshly created resource.
fn created<O: Observed, D>(entity: &Entity<O, D>, id: String) -> Result<SyncOutcome> {
    entity.assign_id(id.clone())?;
    info!(kind = %entity.kind(), name = entity.name(), id = %id, "created");
    Ok(SyncOutcome::Created { id })
}

/// Record the ID of a resource that was deleted and created again.
fn replaced<O: Observed, D>(entity: &Entity<O, D>, id: String) -> Result<SyncOutcome> {
    entity.assign_id(id.clone())?;
    info!(kind = %entity.kind(), name = entity.name(), id = %id, "replaced");
    Ok(SyncOutcome::Replaced { id })
}

fn updated<O: Observed, D>(entity: &Entity<O, D>) -> SyncOutcome {
    info!(
        kind = %entity.kind(),
        name = entity.name(),
        id = entity.id().unwrap_or_default(),
        "updated"
    );
    SyncOutcome::Updated
}
