//! Provider boundary for nimbus.
//!
//! The reconciler never talks to a cloud SDK directly. Everything it needs
//! from the account goes through the [`Provider`] trait:
//!
//! - **Discovery**: paged listings drained with [`drain_pages`] and memoized
//!   per run by [`Discovery`]
//! - **Mutation**: create/update/delete calls, one family per resource kind
//!
//! [`InMemoryProvider`] is a complete in-process account used by tests and by
//! the CLI's snapshot mode. [`TracingProvider`] logs every call.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use nimbus_provider::{Discovery, InMemoryProvider, Provider};
//!
//! let provider: Arc<dyn Provider> = Arc::new(InMemoryProvider::new());
//! let discovery = Discovery::new(provider);
//! let functions = discovery.functions().await?;
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod discovery;
pub mod error;
pub mod memory;
pub mod provider;
pub mod types;

pub use discovery::Discovery;
pub use error::{ProviderError, Result};
pub use memory::{InMemoryProvider, ProviderCall, Snapshot};
pub use provider::{drain_pages, Provider, TracingProvider};
pub use types::{
    ApiGatewayInfo, ApiGatewayRequest, ArtifactSource, BucketInfo, BucketRequest, Created,
    DeadLetterTarget, FunctionInfo, FunctionRequest, ImageEvent, InvokeTarget, ObjectEvent, Page,
    QueueInfo, QueueRequest, RegistryInfo, RegistryRequest, RetrySettings, RoleBinding,
    ServiceAccountInfo, ServiceAccountRequest, TriggerInfo, TriggerRequest, TriggerRule,
};
