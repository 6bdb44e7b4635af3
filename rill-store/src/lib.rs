//! Rill Store - Reactive Operation Result Cache
//!
//! Coordinates per-operation result storage against a normalized entity
//! store: dependency tracking, version-gated invalidation, orphaned-entity
//! cleanup and ordered store-wide change broadcast.
//!
//! # Architecture
//!
//! - [`OperationStore`] keys stored operations by [`rill_core::OperationRequest`]
//!   and is the only public mutation surface. All mutating calls may run
//!   concurrently from arbitrary tasks.
//! - Each stored operation is an observable record: `watch(request)` yields
//!   a result stream that replays the current value and then follows every
//!   update until the operation is removed.
//! - The store subscribes to the entity store's batched update stream; on
//!   each version bump it rechecks affected operations and emits exactly one
//!   batched store-wide event through an ordered single-consumer queue.
//! - After any removal or reset, every entity no stored operation references
//!   anymore is evicted from the entity store in one atomic batch.
//!
//! # Example
//!
//! ```ignore
//! let entities = Arc::new(InMemoryEntityStore::new());
//! let store = OperationStore::new(entities.clone()).await;
//!
//! let request = OperationRequest::new("abc123", "GetBooks")?;
//! let mut results = store.watch(&request).await?;
//!
//! store.set(request.clone(), result).await?;
//! let current = results.next().await;
//! ```

mod broadcast;
mod entity;
mod operation;
mod store;

pub use entity::{EntityStore, InMemoryEntityStore};
pub use store::OperationStore;

// Re-export the core data types alongside the store.
pub use rill_core::{
    EntityKey, EntityStoreError, EntityUpdate, KeyValue, OperationRequest, OperationResult,
    OperationUpdate, ResultError, RillResult, StoreError, StoredOperationSnapshot, Timestamp,
    UpdateKind, VariableValue,
};
