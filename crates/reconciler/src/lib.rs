//! Reconciliation engine for serverless deployments.
//!
//! A deploy run compares what the account holds with what the service
//! configuration declares and converges the two:
//!
//! - **Observed state**: every resource listed by the provider
//! - **Desired state**: functions, triggers, resources and HTTP routes from
//!   the configuration
//! - **Entities**: one per name, carrying either or both states
//! - **Sync**: each entity decides whether to create, update, replace,
//!   delete or leave its resource alone
//!
//! # Ordering
//!
//! Entities sync in dependency stages (service accounts, queues, buckets,
//! container registries, functions, triggers, gateway). A later stage can
//! reference the ID of anything created in an earlier one.
//!
//! # Example
//!
//! ```ignore
//! use std::collections::BTreeMap;
//! use std::sync::Arc;
//!
//! use nimbus_provider::InMemoryProvider;
//! use nimbus_reconciler::{DeployConfig, Reconciler};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = DeployConfig::load("nimbus.yaml")?;
//!     let reconciler = Reconciler::new(Arc::new(InMemoryProvider::new()));
//!     let report = reconciler.deploy(&config, &BTreeMap::new()).await?;
//!     println!("{} changed", report.changed_count());
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod config;
pub mod entity;
pub mod error;
pub mod openapi;
pub mod reconciler;
pub mod registry;
pub mod resolver;
pub mod resources;
pub mod types;

pub use config::{DeployConfig, DeployOptions, FunctionConfig, FunctionEvent, ResourceConfig};
pub use entity::{Entity, Lifecycle, SyncContext, SyncOutcome, Syncable};
pub use error::{Error, Result};
pub use openapi::OpenApiDocument;
pub use reconciler::{Reconciler, load_artifacts};
pub use registry::{Registries, Registry};
pub use resolver::Resolver;
pub use resources::Artifact;
pub use types::{
    DeployReport, EntityFailure, EntityOutcome, ResourceState, ResourceStatus, ServiceInfo,
};
