//! Late-bound references between resources.
//!
//! Declarations name their dependencies (`account: runner`); the provider
//! wants IDs. A [`Resolver`] answers "what is the ID of X right now", and a
//! [`ReferenceBinder`] turns an (explicit ID, name) pair from the
//! configuration into that ID or a precise error.

use nimbus_core::ResourceKind;

use crate::error::{Error, Result};

/// Lookup of current provider IDs by logical name.
///
/// `None` means the target is unknown or has not been created yet.
pub trait Resolver: Send + Sync {
    fn function_id(&self, name: &str) -> Option<String>;
    fn account_id(&self, name: &str) -> Option<String>;
    fn queue_id(&self, name: &str) -> Option<String>;
    fn bucket_id(&self, name: &str) -> Option<String>;
    fn registry_id(&self, name: &str) -> Option<String>;

    /// Dispatch on `kind`. Kinds nothing references resolve to `None`.
    fn resolve(&self, kind: ResourceKind, name: &str) -> Option<String> {
        match kind {
            ResourceKind::Function => self.function_id(name),
            ResourceKind::ServiceAccount => self.account_id(name),
            ResourceKind::MessageQueue => self.queue_id(name),
            ResourceKind::ObjectStorageBucket => self.bucket_id(name),
            ResourceKind::ContainerRegistry => self.registry_id(name),
            ResourceKind::Trigger | ResourceKind::ApiGateway => None,
        }
    }
}

/// Resolves the references of one owning resource.
pub struct ReferenceBinder<'a> {
    resolver: &'a dyn Resolver,
    owner_kind: ResourceKind,
    owner: &'a str,
}

impl<'a> ReferenceBinder<'a> {
    pub const fn new(resolver: &'a dyn Resolver, owner_kind: ResourceKind, owner: &'a str) -> Self {
        Self {
            resolver,
            owner_kind,
            owner,
        }
    }

    /// Resolve an optional reference.
    ///
    /// An explicit `id` wins. Otherwise `name` is looked up, and a name that
    /// does not resolve is an error rather than an empty ID.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingReference`] if `name` is set but unresolved.
    pub fn optional(
        &self,
        kind: ResourceKind,
        name: Option<&str>,
        id: Option<&str>,
    ) -> Result<Option<String>> {
        if let Some(id) = id {
            return Ok(Some(id.to_string()));
        }
        name.map(|name| {
            self.resolver
                .resolve(kind, name)
                .ok_or_else(|| Error::missing_reference(self.owner_kind, self.owner, kind, name))
        })
        .transpose()
    }

    /// Resolve a reference that must be present.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsetReference`] if neither `id` nor `name` is set,
    /// or [`Error::MissingReference`] if `name` is unresolved.
    pub fn required(
        &self,
        kind: ResourceKind,
        name: Option<&str>,
        id: Option<&str>,
    ) -> Result<String> {
        self.optional(kind, name, id)?
            .ok_or_else(|| Error::unset_reference(self.owner_kind, self.owner, kind))
    }

    /// Resolve a reference by name alone.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingReference`] if `name` is unresolved.
    pub fn named(&self, kind: ResourceKind, name: &str) -> Result<String> {
        self.required(kind, Some(name), None)
    }
}
