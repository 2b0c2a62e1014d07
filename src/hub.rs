// src/hub.rs
//
// Broadcast hub: fans pre-serialized envelopes out to all live subscribers.
//
// A single actor task owns the subscriber registry; register, unregister and
// broadcast arrive as commands on one channel and execute strictly in order.
// Delivery to a subscriber is a non-blocking try_send into its bounded
// outbound queue; a full or closed queue counts as a delivery failure and
// the subscriber is removed inline, before the next broadcast.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::tlog;

/// Outbound queue depth per subscriber. A subscriber that falls this far
/// behind the broadcast stream is dropped.
const SUBSCRIBER_QUEUE: usize = 64;

/// Command channel depth between publishers and the hub task.
const COMMAND_QUEUE: usize = 256;

enum HubCommand {
    Register {
        id: u64,
        tx: mpsc::Sender<Vec<u8>>,
    },
    Unregister {
        id: u64,
    },
    Broadcast(Vec<u8>),
    Count(oneshot::Sender<usize>),
    Shutdown,
}

/// Handle for talking to the hub task. Cheap to clone.
#[derive(Clone)]
pub struct HubHandle {
    tx: mpsc::Sender<HubCommand>,
    next_id: Arc<AtomicU64>,
}

impl HubHandle {
    /// Register a new subscriber. Returns its id and the receiving end of
    /// its outbound queue; the caller drains the queue into the connection.
    pub async fn register(&self) -> (u64, mpsc::Receiver<Vec<u8>>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE);
        let _ = self.tx.send(HubCommand::Register { id, tx }).await;
        (id, rx)
    }

    /// Remove a subscriber. Idempotent; a no-op if it is already gone.
    pub async fn unregister(&self, id: u64) {
        let _ = self.tx.send(HubCommand::Unregister { id }).await;
    }

    /// Queue a message for delivery to every current subscriber.
    pub async fn broadcast(&self, message: Vec<u8>) {
        let _ = self.tx.send(HubCommand::Broadcast(message)).await;
    }

    /// Number of live subscribers.
    pub async fn subscriber_count(&self) -> usize {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(HubCommand::Count(tx)).await.is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    /// Drop every subscriber and stop the hub task.
    pub async fn shutdown(&self) {
        let _ = self.tx.send(HubCommand::Shutdown).await;
    }
}

/// Spawn the hub actor task.
pub fn spawn() -> (HubHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(COMMAND_QUEUE);
    let handle = HubHandle {
        tx,
        next_id: Arc::new(AtomicU64::new(1)),
    };
    let task = tokio::spawn(run(rx));
    (handle, task)
}

async fn run(mut rx: mpsc::Receiver<HubCommand>) {
    let mut subscribers: HashMap<u64, mpsc::Sender<Vec<u8>>> = HashMap::new();

    while let Some(cmd) = rx.recv().await {
        match cmd {
            HubCommand::Register { id, tx } => {
                subscribers.insert(id, tx);
                tlog!("[hub] subscriber {} connected; total: {}", id, subscribers.len());
            }
            HubCommand::Unregister { id } => {
                if subscribers.remove(&id).is_some() {
                    tlog!("[hub] subscriber {} disconnected; total: {}", id, subscribers.len());
                }
            }
            HubCommand::Broadcast(message) => {
                // Failed subscribers are removed in the same pass so they
                // cannot receive later broadcasts.
                subscribers.retain(|id, tx| match tx.try_send(message.clone()) {
                    Ok(()) => true,
                    Err(_) => {
                        tlog!("[hub] dropping subscriber {} (delivery failed)", id);
                        false
                    }
                });
            }
            HubCommand::Count(reply) => {
                let _ = reply.send(subscribers.len());
            }
            HubCommand::Shutdown => break,
        }
    }
    // Dropping the registry closes every subscriber queue.
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_broadcast_reaches_all_subscribers() {
        let (hub, _task) = spawn();
        let (_id1, mut rx1) = hub.register().await;
        let (_id2, mut rx2) = hub.register().await;
        let (_id3, mut rx3) = hub.register().await;

        hub.broadcast(b"hello".to_vec()).await;

        assert_eq!(rx1.recv().await.unwrap(), b"hello");
        assert_eq!(rx2.recv().await.unwrap(), b"hello");
        assert_eq!(rx3.recv().await.unwrap(), b"hello");
        assert_eq!(hub.subscriber_count().await, 3);
    }

    #[tokio::test]
    async fn test_failed_subscriber_removed_inline() {
        let (hub, _task) = spawn();
        let (_id1, mut rx1) = hub.register().await;
        let (_id2, rx2) = hub.register().await;
        let (_id3, mut rx3) = hub.register().await;

        // Closing a queue makes the next delivery fail
        drop(rx2);

        hub.broadcast(b"one".to_vec()).await;
        assert_eq!(rx1.recv().await.unwrap(), b"one");
        assert_eq!(rx3.recv().await.unwrap(), b"one");
        assert_eq!(hub.subscriber_count().await, 2);

        // Survivors keep receiving
        hub.broadcast(b"two".to_vec()).await;
        assert_eq!(rx1.recv().await.unwrap(), b"two");
        assert_eq!(rx3.recv().await.unwrap(), b"two");
    }

    #[tokio::test]
    async fn test_unregister_is_idempotent() {
        let (hub, _task) = spawn();
        let (id, _rx) = hub.register().await;
        hub.unregister(id).await;
        hub.unregister(id).await;
        assert_eq!(hub.subscriber_count().await, 0);
    }

    #[tokio::test]
    async fn test_slow_subscriber_dropped_when_queue_fills() {
        let (hub, _task) = spawn();
        let (_id, mut rx) = hub.register().await;

        // Never drain: the bounded queue eventually rejects a try_send
        for _ in 0..(SUBSCRIBER_QUEUE + 1) {
            hub.broadcast(b"x".to_vec()).await;
        }
        assert_eq!(hub.subscriber_count().await, 0);

        // The queued backlog is still readable, then the queue closes
        let mut received = 0;
        while rx.recv().await.is_some() {
            received += 1;
        }
        assert_eq!(received, SUBSCRIBER_QUEUE);
    }

    #[tokio::test]
    async fn test_shutdown_closes_subscribers() {
        let (hub, task) = spawn();
        let (_id, mut rx) = hub.register().await;
        hub.shutdown().await;
        task.await.unwrap();
        assert!(rx.recv().await.is_none());
    }
}
