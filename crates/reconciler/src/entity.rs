//! The generic resource entity.
//!
//! An [`Entity`] pairs what discovery saw with what the configuration asks
//! for. Its slots only admit the three meaningful combinations:
//!
//! | initial | desired | lifecycle   |
//! |---------|---------|-------------|
//! | -       | yes     | create      |
//! | yes     | yes     | update      |
//! | yes     | -       | unmanaged   |
//!
//! Entities are shared by reference during the sync phase so that later
//! stages can read IDs resolved by earlier ones. The resolved ID and the
//! synced flag are therefore write-once interior state.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use nimbus_core::ResourceKind;
use nimbus_provider::{
    ApiGatewayInfo, BucketInfo, FunctionInfo, Provider, ProviderError, QueueInfo, RegistryInfo,
    TriggerInfo,
};
use serde::Serialize;
use tokio::sync::OnceCell;

use crate::config::DeployOptions;
use crate::error::{Error, Result};
use crate::resolver::Resolver;

/// Observed provider state that carries a provider ID.
pub trait Observed: Send + Sync {
    fn id(&self) -> &str;
}

macro_rules! impl_observed {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Observed for $ty {
                fn id(&self) -> &str {
                    &self.id
                }
            }
        )*
    };
}

impl_observed!(
    ApiGatewayInfo,
    BucketInfo,
    FunctionInfo,
    QueueInfo,
    RegistryInfo,
    TriggerInfo,
);

enum Slots<O, D> {
    Observed { initial: O, desired: Option<D> },
    Declared(D),
}

/// Borrowed view of an entity's slots.
#[derive(Debug)]
pub enum Lifecycle<'a, O, D> {
    Create(&'a D),
    Update { initial: &'a O, desired: &'a D },
    Unmanaged(&'a O),
}

/// One resource of one kind, keyed by its logical name.
pub struct Entity<O, D> {
    kind: ResourceKind,
    name: String,
    slots: Slots<O, D>,
    resolved_id: OnceCell<String>,
    synced: AtomicBool,
}

impl<O: Observed, D> Entity<O, D> {
    /// An entity discovered in the account.
    pub fn observed(kind: ResourceKind, name: impl Into<String>, initial: O) -> Self {
        Self::with_slots(
            kind,
            name,
            Slots::Observed {
                initial,
                desired: None,
            },
        )
    }

    /// An entity that only exists in the configuration.
    pub fn declared(kind: ResourceKind, name: impl Into<String>, desired: D) -> Self {
        Self::with_slots(kind, name, Slots::Declared(desired))
    }

    fn with_slots(kind: ResourceKind, name: impl Into<String>, slots: Slots<O, D>) -> Self {
        Self {
            kind,
            name: name.into(),
            slots,
            resolved_id: OnceCell::new(),
            synced: AtomicBool::new(false),
        }
    }

    /// Assign the desired state.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StateAlreadySet`] if a desired state is already present.
    pub fn set_new_state(&mut self, desired: D) -> Result<()> {
        match &mut self.slots {
            Slots::Observed { desired: slot, .. } if slot.is_none() => {
                *slot = Some(desired);
                Ok(())
            }
            Slots::Observed { .. } | Slots::Declared(_) => Err(Error::StateAlreadySet {
                kind: self.kind,
                name: self.name.clone(),
            }),
        }
    }

    pub const fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub const fn initial(&self) -> Option<&O> {
        match &self.slots {
            Slots::Observed { initial, .. } => Some(initial),
            Slots::Declared(_) => None,
        }
    }

    pub const fn desired(&self) -> Option<&D> {
        match &self.slots {
            Slots::Observed { desired, .. } => desired.as_ref(),
            Slots::Declared(desired) => Some(desired),
        }
    }

    pub const fn lifecycle(&self) -> Lifecycle<'_, O, D> {
        match &self.slots {
            Slots::Declared(desired) => Lifecycle::Create(desired),
            Slots::Observed {
                initial,
                desired: Some(desired),
            } => Lifecycle::Update { initial, desired },
            Slots::Observed {
                initial,
                desired: None,
            } => Lifecycle::Unmanaged(initial),
        }
    }

    /// Current provider ID: the one assigned this run, else the observed one.
    pub fn id(&self) -> Option<&str> {
        self.resolved_id
            .get()
            .map(String::as_str)
            .or_else(|| self.initial().map(Observed::id))
    }

    /// Record the ID returned by a successful create.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IdAlreadyAssigned`] on a second assignment.
    pub fn assign_id(&self, id: impl Into<String>) -> Result<()> {
        self.resolved_id
            .set(id.into())
            .map_err(|_| Error::IdAlreadyAssigned {
                kind: self.kind,
                name: self.name.clone(),
            })
    }

    /// Mark the entity as synced for this run.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadySynced`] if it was already marked.
    pub fn begin_sync(&self) -> Result<()> {
        if self.synced.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadySynced {
                kind: self.kind,
                name: self.name.clone(),
            });
        }
        Ok(())
    }

    pub fn is_synced(&self) -> bool {
        self.synced.load(Ordering::SeqCst)
    }

    /// Wrap a provider failure of `operation` with this entity's identity.
    pub fn provider_failure(
        &self,
        operation: &'static str,
    ) -> impl FnOnce(ProviderError) -> Error + '_ {
        move |source| Error::provider(self.kind, self.name.clone(), operation, source)
    }
}

/// What a single sync did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SyncOutcome {
    Created { id: String },
    Updated,
    /// Deleted and created again under a new ID.
    Replaced { id: String },
    Deleted,
    Unchanged,
    Unmanaged,
}

impl SyncOutcome {
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Created { .. } => "created",
            Self::Updated => "updated",
            Self::Replaced { .. } => "replaced",
            Self::Deleted => "deleted",
            Self::Unchanged => "unchanged",
            Self::Unmanaged => "unmanaged",
        }
    }

    /// Whether the provider was mutated.
    #[must_use]
    pub const fn is_change(&self) -> bool {
        matches!(
            self,
            Self::Created { .. } | Self::Updated | Self::Replaced { .. } | Self::Deleted
        )
    }
}

/// Everything a sync may touch besides its own entity.
#[derive(Clone, Copy)]
pub struct SyncContext<'a> {
    pub provider: &'a dyn Provider,
    pub resolver: &'a dyn Resolver,
    pub options: &'a DeployOptions,
}

/// Per-kind convergence policy.
#[async_trait]
pub trait Syncable: Send + Sync {
    /// Converge this resource toward its desired state.
    ///
    /// Called at most once per run, after [`Entity::begin_sync`].
    async fn sync(&self, ctx: &SyncContext<'_>) -> Result<SyncOutcome>;
}
