//! The operation store: a keyed registry of stored operations coordinating
//! result writes, entity-driven rechecks, orphan cleanup and ordered
//! store-wide change broadcast.
//!
//! Lock ordering is registry before operation record, never the reverse, and
//! the registry lock is never held across entity-store calls or subscriber
//! delivery.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::debug;

use rill_core::{
    EntityKey, EntityStoreError, EntityUpdate, OperationRequest, OperationResult,
    OperationUpdate, RillResult, StoreError, StoredOperationSnapshot, UpdateKind,
};

use crate::broadcast::UpdateBroadcaster;
use crate::entity::EntityStore;
use crate::operation::StoredOperation;

/// Single source of truth mapping operation requests to stored operations.
///
/// All mutating calls may run concurrently from arbitrary tasks; the
/// store-wide update feed delivers one ordered sequence of events to every
/// observer regardless. Construction subscribes to the entity store's update
/// stream and spawns the recheck task, so a store must be created inside a
/// tokio runtime.
pub struct OperationStore {
    inner: Arc<StoreInner>,
    entity_task: JoinHandle<()>,
}

struct StoreInner {
    entity_store: Arc<dyn EntityStore>,
    operations: RwLock<HashMap<OperationRequest, Arc<StoredOperation>>>,
    broadcaster: UpdateBroadcaster,
    disposed: AtomicBool,
}

impl OperationStore {
    /// Create a store bound to the given entity store.
    ///
    /// The entity subscription is registered before this returns, so no
    /// update published afterwards can be missed.
    pub async fn new(entity_store: Arc<dyn EntityStore>) -> Self {
        let mut entity_updates = entity_store.subscribe().await;
        let inner = Arc::new(StoreInner {
            entity_store,
            operations: RwLock::new(HashMap::new()),
            broadcaster: UpdateBroadcaster::new(),
            disposed: AtomicBool::new(false),
        });

        let entity_task = tokio::spawn({
            let inner = Arc::clone(&inner);
            async move {
                while let Some(update) = entity_updates.recv().await {
                    inner.on_entity_update(update).await;
                }
            }
        });

        Self { inner, entity_task }
    }

    /// Insert or update the stored operation for `request`.
    ///
    /// Creates the record if absent; concurrent creators converge on the
    /// same instance. Replaces the stored result, dependency set and version
    /// atomically and emits one `Updated` event for this operation.
    pub async fn set(
        &self,
        request: OperationRequest,
        result: OperationResult,
    ) -> RillResult<()> {
        loop {
            self.ensure_live()?;
            let operation = self.inner.get_or_create(&request).await;
            if operation.set_result(result.clone()).await {
                debug!(
                    operation = %request.operation_name(),
                    version = result.version(),
                    "stored operation result"
                );
                let snapshot = operation.snapshot().await;
                self.inner
                    .broadcaster
                    .publish(OperationUpdate::single(UpdateKind::Updated, snapshot));
                return Ok(());
            }
            // Lost a race with a concurrent remove: the instance completed
            // and left the registry between lookup and write. Retry against
            // a fresh record.
        }
    }

    /// Clear the stored result for `request`, keeping the registry entry and
    /// its subscribers intact. Triggers orphan cleanup and emits a `Removed`
    /// event. Unknown requests are a benign no-op.
    pub async fn reset(&self, request: &OperationRequest) -> RillResult<()> {
        self.ensure_live()?;
        let operation = self.inner.operations.read().await.get(request).cloned();
        let Some(operation) = operation else {
            return Ok(());
        };
        if !operation.clear_result().await {
            return Ok(());
        }
        self.inner.clean_entity_store().await?;
        let snapshot = operation.snapshot().await;
        self.inner
            .broadcaster
            .publish(OperationUpdate::single(UpdateKind::Removed, snapshot));
        Ok(())
    }

    /// Atomically detach and remove the stored operation for `request`,
    /// completing its subscriber streams. Triggers orphan cleanup and emits
    /// a `Removed` event. Unknown requests are a benign no-op.
    pub async fn remove(&self, request: &OperationRequest) -> RillResult<()> {
        self.ensure_live()?;
        let operation = self.inner.operations.write().await.remove(request);
        let Some(operation) = operation else {
            return Ok(());
        };
        operation.complete().await;
        self.inner.clean_entity_store().await?;
        let snapshot = operation.snapshot().await;
        debug!(operation = %request.operation_name(), "removed stored operation");
        self.inner
            .broadcaster
            .publish(OperationUpdate::single(UpdateKind::Removed, snapshot));
        Ok(())
    }

    /// Atomically remove every stored operation, completing all subscriber
    /// streams, and emit one batched `Removed` event covering all of them.
    pub async fn clear(&self) -> RillResult<()> {
        self.ensure_live()?;
        let drained: Vec<Arc<StoredOperation>> = {
            let mut operations = self.inner.operations.write().await;
            operations.drain().map(|(_, operation)| operation).collect()
        };
        for operation in &drained {
            operation.complete().await;
        }
        self.inner.clean_entity_store().await?;

        let mut snapshots = Vec::with_capacity(drained.len());
        for operation in &drained {
            snapshots.push(operation.snapshot().await);
        }
        debug!(operations = snapshots.len(), "cleared operation store");
        self.inner
            .broadcaster
            .publish(OperationUpdate::new(UpdateKind::Removed, snapshots));
        Ok(())
    }

    /// Non-blocking snapshot read of the last known result. Does not
    /// subscribe and does not create a registry entry.
    pub async fn try_get(
        &self,
        request: &OperationRequest,
    ) -> RillResult<Option<OperationResult>> {
        self.ensure_live()?;
        let operation = self.inner.operations.read().await.get(request).cloned();
        match operation {
            Some(operation) => Ok(operation.last_result().await),
            None => Ok(None),
        }
    }

    /// Point-in-time enumeration of the whole registry. Mutations after the
    /// call do not affect the returned vector.
    pub async fn get_all(&self) -> RillResult<Vec<StoredOperationSnapshot>> {
        self.ensure_live()?;
        let operations: Vec<Arc<StoredOperation>> =
            self.inner.operations.read().await.values().cloned().collect();
        let mut snapshots = Vec::with_capacity(operations.len());
        for operation in operations {
            snapshots.push(operation.snapshot().await);
        }
        Ok(snapshots)
    }

    /// Concatenation of every stored operation's dependency set.
    pub async fn used_entity_keys(&self) -> RillResult<Vec<EntityKey>> {
        self.ensure_live()?;
        let operations: Vec<Arc<StoredOperation>> =
            self.inner.operations.read().await.values().cloned().collect();
        let mut keys = Vec::new();
        for operation in operations {
            keys.extend(operation.dependencies().await);
        }
        Ok(keys)
    }

    /// Observe one operation's results, creating the record if necessary.
    ///
    /// The current result, if any, is replayed to the new subscriber
    /// immediately; every subsequent update follows. The stream completes
    /// when the operation is removed or the store is disposed.
    pub async fn watch(
        &self,
        request: &OperationRequest,
    ) -> RillResult<UnboundedReceiverStream<OperationResult>> {
        self.ensure_live()?;
        let operation = self.inner.get_or_create(request).await;
        Ok(operation.subscribe().await)
    }

    /// Observe the ordered store-wide update feed shared by all observers.
    pub async fn watch_updates(
        &self,
    ) -> RillResult<UnboundedReceiverStream<OperationUpdate>> {
        self.ensure_live()?;
        Ok(self.inner.broadcaster.subscribe().await)
    }

    /// Tear the store down: detach from the entity store, complete every
    /// per-operation stream and the store-wide feed, and fail all further
    /// calls with [`StoreError::Disposed`]. Idempotent.
    pub async fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.entity_task.abort();
        let operations: Vec<Arc<StoredOperation>> =
            self.inner.operations.read().await.values().cloned().collect();
        for operation in operations {
            operation.complete().await;
        }
        self.inner.broadcaster.shutdown().await;
        debug!("operation store disposed");
    }

    fn ensure_live(&self) -> RillResult<()> {
        if self.inner.disposed.load(Ordering::SeqCst) {
            Err(StoreError::Disposed)
        } else {
            Ok(())
        }
    }
}

impl Drop for OperationStore {
    fn drop(&mut self) {
        self.entity_task.abort();
    }
}

impl StoreInner {
    /// Get-or-create under the registry lock; concurrent creators converge
    /// on one instance. Completed records never linger in the registry, so a
    /// hit on the read path is always live.
    async fn get_or_create(&self, request: &OperationRequest) -> Arc<StoredOperation> {
        if let Some(operation) = self.operations.read().await.get(request) {
            return Arc::clone(operation);
        }
        let mut operations = self.operations.write().await;
        Arc::clone(
            operations
                .entry(request.clone())
                .or_insert_with(|| Arc::new(StoredOperation::new(request.clone()))),
        )
    }

    /// Recheck every live operation against one entity update and emit a
    /// single batched `Updated` event for all affected operations, bounding
    /// fan-out to one event per entity-store version bump.
    async fn on_entity_update(&self, update: EntityUpdate) {
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }
        let operations: Vec<Arc<StoredOperation>> =
            self.operations.read().await.values().cloned().collect();

        let mut affected = Vec::new();
        for operation in operations {
            if let Some(snapshot) = operation.recheck(&update).await {
                affected.push(snapshot);
            }
        }

        if !affected.is_empty() {
            debug!(
                version = update.version(),
                affected = affected.len(),
                "rechecked stored operations"
            );
            self.broadcaster
                .publish(OperationUpdate::new(UpdateKind::Updated, affected));
        }
    }

    /// Remove every entity the entity store still holds that no stored
    /// operation references anymore, as one atomic batch. A failure
    /// propagates to the caller of the triggering store call; cleanup is
    /// idempotent and safe to retry.
    async fn clean_entity_store(&self) -> Result<(), EntityStoreError> {
        let operations: Vec<Arc<StoredOperation>> =
            self.operations.read().await.values().cloned().collect();
        let mut retained = HashSet::new();
        for operation in operations {
            retained.extend(operation.dependencies().await);
        }

        let orphans: HashSet<EntityKey> = self
            .entity_store
            .entity_keys()
            .await
            .into_iter()
            .filter(|key| !retained.contains(key))
            .collect();
        if orphans.is_empty() {
            return Ok(());
        }

        let removed = self.entity_store.remove_entities(&orphans).await?;
        debug!(removed, "evicted orphaned entities");
        Ok(())
    }
}
