//! Rill Core - Data Types
//!
//! Pure data structures with no coordination logic. The `rill-store` crate
//! builds the reactive operation cache on top of these.
//!
//! # Key Types
//!
//! - [`OperationRequest`]: immutable, value-comparable key identifying one
//!   operation invocation (document id + operation name + variables)
//! - [`EntityKey`]: identifier of one normalized entity (typename + key)
//! - [`OperationResult`]: an operation's result data together with the
//!   entity keys it depends on and the entity-store version it was built at
//! - [`OperationUpdate`]: store-wide change event batching affected
//!   operation snapshots under one [`UpdateKind`]
//! - [`EntityUpdate`]: versioned batch of changed entity keys consumed from
//!   the entity store
//! - [`StoreError`] / [`RillResult`]: error taxonomy shared by all crates

use chrono::{DateTime, Utc};

mod error;
mod request;
mod result;
mod update;
mod value;

pub use error::{EntityStoreError, RillResult, StoreError};
pub use request::OperationRequest;
pub use result::{OperationResult, ResultError};
pub use update::{EntityUpdate, OperationUpdate, StoredOperationSnapshot, UpdateKind};
pub use value::{EntityKey, KeyValue, VariableValue};

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;
