//! Core types, errors, and file loading helpers for nimbus.
//!
//! Everything here is shared by the provider boundary, the reconciler and the
//! CLI. Nothing in this crate talks to a cloud account.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod kind;
pub mod load;

pub use error::{Error, Result};
pub use kind::ResourceKind;
pub use load::{read_bytes, read_json, read_yaml};
