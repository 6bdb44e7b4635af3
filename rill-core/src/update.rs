//! Update events flowing out of the operation store and in from the entity
//! store.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::request::OperationRequest;
use crate::result::OperationResult;
use crate::value::EntityKey;
use crate::Timestamp;

/// Kind of change described by a store-wide update event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UpdateKind {
    /// Operations gained a new or recomputed result.
    Updated,
    /// Operations were removed or had their result cleared.
    Removed,
}

/// Read-only view of one stored operation at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredOperationSnapshot {
    /// The request the operation was created for.
    pub request: OperationRequest,
    /// The last known result, absent until the first set or after a reset.
    pub result: Option<OperationResult>,
    /// Number of active per-operation subscribers.
    pub subscribers: usize,
    /// When the operation last changed.
    pub last_modified: Timestamp,
}

/// Store-wide update event: a batch of operations that were added, updated or
/// removed together. Immutable once constructed; owned by the broadcaster
/// until delivered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationUpdate {
    kind: UpdateKind,
    operations: Vec<StoredOperationSnapshot>,
}

impl OperationUpdate {
    /// Create an update covering a batch of operations.
    pub fn new(kind: UpdateKind, operations: Vec<StoredOperationSnapshot>) -> Self {
        Self { kind, operations }
    }

    /// Create an update covering a single operation.
    pub fn single(kind: UpdateKind, operation: StoredOperationSnapshot) -> Self {
        Self {
            kind,
            operations: vec![operation],
        }
    }

    /// The kind of change this event describes.
    pub fn kind(&self) -> UpdateKind {
        self.kind
    }

    /// The operations affected by this change.
    pub fn operations(&self) -> &[StoredOperationSnapshot] {
        &self.operations
    }

    /// True if the event covers the given request.
    pub fn involves(&self, request: &OperationRequest) -> bool {
        self.operations.iter().any(|op| &op.request == request)
    }
}

/// Batched update event consumed from the entity store.
///
/// Carries the new global version and the entity keys that changed in that
/// version. Versions on the subscription stream are strictly increasing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityUpdate {
    version: u64,
    changed: HashSet<EntityKey>,
}

impl EntityUpdate {
    /// Create an entity update for the given version and changed keys.
    pub fn new(version: u64, changed: HashSet<EntityKey>) -> Self {
        Self { version, changed }
    }

    /// The entity-store version this batch produced.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// The entity keys that changed in this version.
    pub fn changed(&self) -> &HashSet<EntityKey> {
        &self.changed
    }
}
