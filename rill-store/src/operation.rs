//! Per-operation cache record.
//!
//! A stored operation moves through three states: empty (created by a watch
//! before any result arrived), populated (holds a result together with the
//! dependency set and version it was built at), and completed (terminal,
//! reached on removal). Result, dependency set and version always change
//! inside one lock section, so readers never observe a partially updated
//! record.

use std::collections::HashSet;
use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::UnboundedReceiverStream;

use chrono::Utc;
use rill_core::{
    EntityKey, EntityUpdate, OperationRequest, OperationResult, StoredOperationSnapshot,
    Timestamp,
};

#[derive(Debug)]
struct OperationState {
    result: Option<OperationResult>,
    dependencies: HashSet<EntityKey>,
    version: u64,
    last_modified: Timestamp,
    subscribers: Vec<mpsc::UnboundedSender<OperationResult>>,
    completed: bool,
}

/// Mutable cache record for one operation request.
#[derive(Debug)]
pub(crate) struct StoredOperation {
    request: OperationRequest,
    state: Mutex<OperationState>,
}

impl StoredOperation {
    pub(crate) fn new(request: OperationRequest) -> Self {
        Self {
            request,
            state: Mutex::new(OperationState {
                result: None,
                dependencies: HashSet::new(),
                version: 0,
                last_modified: Utc::now(),
                subscribers: Vec::new(),
                completed: false,
            }),
        }
    }

    pub(crate) fn request(&self) -> &OperationRequest {
        &self.request
    }

    /// Replace the stored result, its dependency set and version in one
    /// step, then push the new result to every live subscriber.
    ///
    /// The record's version never decreases: a result stamped older than
    /// the record is restamped at the record's current version, so staleness
    /// gating stays monotonic even against a misbehaving caller.
    ///
    /// Returns `false` without touching anything if the operation has
    /// already completed; a completed record is terminal.
    pub(crate) async fn set_result(&self, result: OperationResult) -> bool {
        let mut state = self.state.lock().await;
        if state.completed {
            return false;
        }
        let version = state.version.max(result.version());
        let result = result.with_version(version);
        state.dependencies = result.dependencies().clone();
        state.version = version;
        state.last_modified = Utc::now();
        push_to_subscribers(&mut state, &result);
        state.result = Some(result);
        true
    }

    /// Clear the result and dependency set, keeping subscribers attached.
    /// The version survives so staleness gating stays monotonic.
    pub(crate) async fn clear_result(&self) -> bool {
        let mut state = self.state.lock().await;
        if state.completed {
            return false;
        }
        state.result = None;
        state.dependencies.clear();
        state.last_modified = Utc::now();
        true
    }

    /// Recheck this operation against an entity update.
    ///
    /// A recheck fires only when the update's version is newer than the
    /// operation's and the changed keys intersect the dependency set. It
    /// restamps the version, republishes the current result to subscribers
    /// (the value need not have changed) and returns a snapshot for the
    /// batched store-wide event. Returns `None` when the update is gated
    /// out.
    pub(crate) async fn recheck(&self, update: &EntityUpdate) -> Option<StoredOperationSnapshot> {
        let mut state = self.state.lock().await;
        if state.completed || state.version >= update.version() {
            return None;
        }
        if state.dependencies.is_disjoint(update.changed()) {
            return None;
        }

        state.version = update.version();
        state.last_modified = Utc::now();
        if let Some(result) = state.result.take() {
            let result = result.with_version(update.version());
            push_to_subscribers(&mut state, &result);
            state.result = Some(result);
        }
        Some(snapshot_locked(&self.request, &mut state))
    }

    /// Terminal transition: no further results will ever be delivered.
    /// Dropping the subscriber senders closes every per-operation stream.
    pub(crate) async fn complete(&self) {
        let mut state = self.state.lock().await;
        state.completed = true;
        state.subscribers.clear();
    }

    /// Attach a new subscriber. The current result, if any, is replayed
    /// immediately; a completed operation yields an already-closed stream.
    pub(crate) async fn subscribe(&self) -> UnboundedReceiverStream<OperationResult> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock().await;
        if !state.completed {
            if let Some(result) = &state.result {
                let _ = tx.send(result.clone());
            }
            state.subscribers.push(tx);
        }
        UnboundedReceiverStream::new(rx)
    }

    pub(crate) async fn last_result(&self) -> Option<OperationResult> {
        self.state.lock().await.result.clone()
    }

    pub(crate) async fn dependencies(&self) -> HashSet<EntityKey> {
        self.state.lock().await.dependencies.clone()
    }

    pub(crate) async fn snapshot(&self) -> StoredOperationSnapshot {
        let mut state = self.state.lock().await;
        snapshot_locked(&self.request, &mut state)
    }
}

fn push_to_subscribers(state: &mut OperationState, result: &OperationResult) {
    state
        .subscribers
        .retain(|subscriber| subscriber.send(result.clone()).is_ok());
}

fn snapshot_locked(
    request: &OperationRequest,
    state: &mut OperationState,
) -> StoredOperationSnapshot {
    state.subscribers.retain(|subscriber| !subscriber.is_closed());
    StoredOperationSnapshot {
        request: request.clone(),
        result: state.result.clone(),
        subscribers: state.subscribers.len(),
        last_modified: state.last_modified,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio_stream::StreamExt;

    fn request() -> OperationRequest {
        OperationRequest::new("doc", "GetBooks").expect("valid request")
    }

    fn result_with(key: EntityKey, version: u64) -> OperationResult {
        OperationResult::new(json!({"ok": true}))
            .with_dependency(key)
            .with_version(version)
    }

    #[tokio::test]
    async fn set_result_replaces_dependencies_and_version() {
        let operation = StoredOperation::new(request());
        assert!(
            operation
                .set_result(result_with(EntityKey::new("Book", 1), 3))
                .await
        );
        assert!(
            operation
                .set_result(result_with(EntityKey::new("Author", "ann"), 5))
                .await
        );

        let deps = operation.dependencies().await;
        assert_eq!(deps.len(), 1);
        assert!(deps.contains(&EntityKey::new("Author", "ann")));

        let snapshot = operation.snapshot().await;
        assert_eq!(snapshot.result.expect("populated").version(), 5);
    }

    #[tokio::test]
    async fn set_result_never_rolls_the_version_back() {
        let operation = StoredOperation::new(request());
        operation
            .set_result(result_with(EntityKey::new("Book", 1), 5))
            .await;

        // A result stamped behind the record is restamped, not trusted.
        operation
            .set_result(result_with(EntityKey::new("Book", 2), 3))
            .await;
        let snapshot = operation.snapshot().await;
        assert_eq!(snapshot.result.expect("populated").version(), 5);

        // A genuinely newer result still advances the version.
        operation
            .set_result(result_with(EntityKey::new("Book", 3), 8))
            .await;
        let snapshot = operation.snapshot().await;
        assert_eq!(snapshot.result.expect("populated").version(), 8);
    }

    #[tokio::test]
    async fn subscribe_replays_current_result() {
        let operation = StoredOperation::new(request());
        operation
            .set_result(result_with(EntityKey::new("Book", 1), 1))
            .await;

        let mut stream = operation.subscribe().await;
        let replayed = stream.next().await.expect("replayed result");
        assert_eq!(replayed.version(), 1);
    }

    #[tokio::test]
    async fn empty_operation_replays_nothing() {
        let operation = StoredOperation::new(request());
        let mut stream = operation.subscribe().await;
        operation
            .set_result(result_with(EntityKey::new("Book", 1), 1))
            .await;

        // The only delivered item is the set, not a replay of emptiness.
        let first = stream.next().await.expect("set result");
        assert_eq!(first.version(), 1);
    }

    #[tokio::test]
    async fn recheck_gates_on_version_and_overlap() {
        let operation = StoredOperation::new(request());
        operation
            .set_result(result_with(EntityKey::new("Book", 1), 2))
            .await;

        let stale: HashSet<_> = [EntityKey::new("Book", 1)].into_iter().collect();
        assert!(operation
            .recheck(&EntityUpdate::new(2, stale.clone()))
            .await
            .is_none());

        let unrelated: HashSet<_> = [EntityKey::new("Author", "ann")].into_iter().collect();
        assert!(operation
            .recheck(&EntityUpdate::new(3, unrelated))
            .await
            .is_none());

        let snapshot = operation
            .recheck(&EntityUpdate::new(3, stale))
            .await
            .expect("qualifying recheck");
        assert_eq!(snapshot.result.expect("populated").version(), 3);
    }

    #[tokio::test]
    async fn recheck_republishes_to_subscribers() {
        let operation = StoredOperation::new(request());
        operation
            .set_result(result_with(EntityKey::new("Book", 1), 1))
            .await;

        let mut stream = operation.subscribe().await;
        let _replay = stream.next().await.expect("replay");

        let changed: HashSet<_> = [EntityKey::new("Book", 1)].into_iter().collect();
        operation
            .recheck(&EntityUpdate::new(2, changed))
            .await
            .expect("qualifying recheck");

        let rechecked = stream.next().await.expect("republished result");
        assert_eq!(rechecked.version(), 2);
        assert_eq!(rechecked.data(), Some(&json!({"ok": true})));
    }

    #[tokio::test]
    async fn clear_result_keeps_subscribers_attached() {
        let operation = StoredOperation::new(request());
        operation
            .set_result(result_with(EntityKey::new("Book", 1), 1))
            .await;
        let mut stream = operation.subscribe().await;
        let _replay = stream.next().await;

        assert!(operation.clear_result().await);
        assert!(operation.last_result().await.is_none());
        assert!(operation.dependencies().await.is_empty());

        // The surviving subscriber receives the next set.
        operation
            .set_result(result_with(EntityKey::new("Book", 2), 2))
            .await;
        let next = stream.next().await.expect("result after reset");
        assert_eq!(next.version(), 2);
    }

    #[tokio::test]
    async fn complete_is_terminal_and_closes_streams() {
        let operation = StoredOperation::new(request());
        let mut stream = operation.subscribe().await;

        operation.complete().await;
        assert!(stream.next().await.is_none());

        assert!(
            !operation
                .set_result(result_with(EntityKey::new("Book", 1), 1))
                .await
        );
        assert!(!operation.clear_result().await);

        let changed: HashSet<_> = [EntityKey::new("Book", 1)].into_iter().collect();
        assert!(operation.recheck(&EntityUpdate::new(9, changed)).await.is_none());

        let mut late = operation.subscribe().await;
        assert!(late.next().await.is_none());
    }

    #[tokio::test]
    async fn snapshot_counts_live_subscribers() {
        let operation = StoredOperation::new(request());
        let stream_a = operation.subscribe().await;
        let stream_b = operation.subscribe().await;
        assert_eq!(operation.snapshot().await.subscribers, 2);

        drop(stream_a);
        assert_eq!(operation.snapshot().await.subscribers, 1);
        drop(stream_b);
        assert_eq!(operation.snapshot().await.subscribers, 0);
    }
}
