//! Ordered store-wide update delivery.
//!
//! Producers on arbitrary tasks enqueue events into an unbounded queue; a
//! single consumer task drains it and fans each event out to every observer
//! in sequence. Observer callbacks therefore never run on a producer's task,
//! and an observer that calls back into the operation store merely enqueues
//! another event instead of recursing into delivery.

use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::debug;

use rill_core::OperationUpdate;

type ObserverList = Arc<Mutex<Vec<mpsc::UnboundedSender<OperationUpdate>>>>;

/// Single-consumer broadcast queue for store-wide update events.
///
/// Every observer receives events in exactly the order they were enqueued.
#[derive(Debug)]
pub(crate) struct UpdateBroadcaster {
    queue: mpsc::UnboundedSender<OperationUpdate>,
    observers: ObserverList,
    consumer: JoinHandle<()>,
}

impl UpdateBroadcaster {
    /// Spawn the consumer task. Must be called within a tokio runtime.
    pub(crate) fn new() -> Self {
        let (queue, mut events) = mpsc::unbounded_channel::<OperationUpdate>();
        let observers: ObserverList = Arc::new(Mutex::new(Vec::new()));

        let consumer = tokio::spawn({
            let observers = Arc::clone(&observers);
            async move {
                while let Some(update) = events.recv().await {
                    let mut sinks = observers.lock().await;
                    sinks.retain(|sink| sink.send(update.clone()).is_ok());
                }
            }
        });

        Self {
            queue,
            observers,
            consumer,
        }
    }

    /// Enqueue an event for ordered delivery. Never blocks.
    pub(crate) fn publish(&self, update: OperationUpdate) {
        if self.queue.send(update).is_err() {
            debug!("update dropped after broadcaster shutdown");
        }
    }

    /// Register a new observer stream. Only events published after this
    /// call are delivered to it.
    pub(crate) async fn subscribe(&self) -> UnboundedReceiverStream<OperationUpdate> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.observers.lock().await.push(tx);
        UnboundedReceiverStream::new(rx)
    }

    /// Stop the consumer and complete every observer stream. Events still
    /// queued at shutdown are discarded.
    pub(crate) async fn shutdown(&self) {
        self.consumer.abort();
        self.observers.lock().await.clear();
    }
}

impl Drop for UpdateBroadcaster {
    fn drop(&mut self) {
        self.consumer.abort();
    }
}
