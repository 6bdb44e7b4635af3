//! Entity store contract and the in-memory reference implementation.
//!
//! The operation store never reaches into the entity store's internals. It
//! composes with exactly three things: the batched update stream, a snapshot
//! read of the known entity keys, and one atomic batch-removal primitive.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tokio::sync::{mpsc, Mutex, RwLock};

use rill_core::{EntityKey, EntityStoreError, EntityUpdate};

/// Contract the operation store consumes from the normalized entity store.
///
/// Implementations must apply mutations atomically: a batch removal either
/// lands as a whole or not at all, and concurrent readers never observe a
/// half-applied snapshot.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Subscribe to batched update events. Versions on the returned stream
    /// are strictly increasing.
    async fn subscribe(&self) -> mpsc::UnboundedReceiver<EntityUpdate>;

    /// The current snapshot version.
    async fn version(&self) -> u64;

    /// The full set of entity keys known to the current snapshot.
    async fn entity_keys(&self) -> HashSet<EntityKey>;

    /// Atomically remove a batch of entities. Returns how many were removed.
    async fn remove_entities(&self, keys: &HashSet<EntityKey>)
        -> Result<u64, EntityStoreError>;
}

#[derive(Debug, Default)]
struct EntityState {
    version: u64,
    entities: HashMap<EntityKey, Value>,
}

/// In-memory entity store.
///
/// Versioned map behind an async `RwLock`; every mutation bumps the version
/// exactly once and emits exactly one [`EntityUpdate`] covering the whole
/// batch.
#[derive(Debug, Default)]
pub struct InMemoryEntityStore {
    state: RwLock<EntityState>,
    watchers: Mutex<Vec<mpsc::UnboundedSender<EntityUpdate>>>,
}

impl InMemoryEntityStore {
    /// Create an empty entity store at version zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically write a batch of entities, bumping the version once and
    /// notifying subscribers with one update covering the batch.
    ///
    /// Returns the new snapshot version. An empty batch is a no-op and does
    /// not bump the version.
    pub async fn write_entities(
        &self,
        entries: impl IntoIterator<Item = (EntityKey, Value)>,
    ) -> u64 {
        let update = {
            let mut state = self.state.write().await;
            let mut changed = HashSet::new();
            for (key, value) in entries {
                changed.insert(key.clone());
                state.entities.insert(key, value);
            }
            if changed.is_empty() {
                return state.version;
            }
            state.version += 1;
            EntityUpdate::new(state.version, changed)
        };

        let version = update.version();
        self.notify(update).await;
        version
    }

    /// Read one entity's snapshot value.
    pub async fn get(&self, key: &EntityKey) -> Option<Value> {
        self.state.read().await.entities.get(key).cloned()
    }

    /// Number of entities in the current snapshot.
    pub async fn len(&self) -> usize {
        self.state.read().await.entities.len()
    }

    /// True when the snapshot holds no entities.
    pub async fn is_empty(&self) -> bool {
        self.state.read().await.entities.is_empty()
    }

    async fn notify(&self, update: EntityUpdate) {
        let mut watchers = self.watchers.lock().await;
        watchers.retain(|watcher| watcher.send(update.clone()).is_ok());
    }
}

#[async_trait]
impl EntityStore for InMemoryEntityStore {
    async fn subscribe(&self) -> mpsc::UnboundedReceiver<EntityUpdate> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.watchers.lock().await.push(tx);
        rx
    }

    async fn version(&self) -> u64 {
        self.state.read().await.version
    }

    async fn entity_keys(&self) -> HashSet<EntityKey> {
        self.state.read().await.entities.keys().cloned().collect()
    }

    async fn remove_entities(
        &self,
        keys: &HashSet<EntityKey>,
    ) -> Result<u64, EntityStoreError> {
        if keys.is_empty() {
            return Ok(0);
        }

        let (removed, update) = {
            let mut state = self.state.write().await;
            let mut removed_keys = HashSet::new();
            for key in keys {
                if state.entities.remove(key).is_some() {
                    removed_keys.insert(key.clone());
                }
            }
            if removed_keys.is_empty() {
                return Ok(0);
            }
            state.version += 1;
            let update = EntityUpdate::new(state.version, removed_keys.clone());
            (removed_keys.len() as u64, update)
        };

        self.notify(update).await;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn batch_write_bumps_version_once() {
        let store = InMemoryEntityStore::new();
        let version = store
            .write_entities(vec![
                (EntityKey::new("Book", 1), json!({"title": "Dune"})),
                (EntityKey::new("Book", 2), json!({"title": "Foundation"})),
            ])
            .await;

        assert_eq!(version, 1);
        assert_eq!(store.version().await, 1);
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn empty_write_does_not_bump_version() {
        let store = InMemoryEntityStore::new();
        let version = store.write_entities(Vec::new()).await;
        assert_eq!(version, 0);
    }

    #[tokio::test]
    async fn subscribers_receive_one_update_per_batch() {
        let store = InMemoryEntityStore::new();
        let mut updates = store.subscribe().await;

        store
            .write_entities(vec![
                (EntityKey::new("Book", 1), json!({})),
                (EntityKey::new("Author", "ann"), json!({})),
            ])
            .await;

        let update = updates.recv().await.expect("one update");
        assert_eq!(update.version(), 1);
        assert_eq!(update.changed().len(), 2);
        assert!(updates.try_recv().is_err());
    }

    #[tokio::test]
    async fn remove_entities_is_one_atomic_batch() {
        let store = InMemoryEntityStore::new();
        store
            .write_entities(vec![
                (EntityKey::new("Book", 1), json!({})),
                (EntityKey::new("Book", 2), json!({})),
                (EntityKey::new("Book", 3), json!({})),
            ])
            .await;

        let mut updates = store.subscribe().await;
        let orphans: HashSet<_> = [EntityKey::new("Book", 1), EntityKey::new("Book", 3)]
            .into_iter()
            .collect();
        let removed = store.remove_entities(&orphans).await.expect("removal succeeds");

        assert_eq!(removed, 2);
        assert_eq!(store.len().await, 1);

        let update = updates.recv().await.expect("one update");
        assert_eq!(update.version(), 2);
        assert_eq!(update.changed(), &orphans);
    }

    #[tokio::test]
    async fn removing_unknown_keys_is_a_no_op() {
        let store = InMemoryEntityStore::new();
        let mut updates = store.subscribe().await;
        let keys: HashSet<_> = [EntityKey::new("Ghost", 1)].into_iter().collect();

        let removed = store.remove_entities(&keys).await.expect("removal succeeds");
        assert_eq!(removed, 0);
        assert_eq!(store.version().await, 0);
        assert!(updates.try_recv().is_err());
    }
}
