//! Session lifecycle notifications fanned out to subscribers

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{Mutex, mpsc};
use tracing::debug;

use super::types::Session;

/// Why a session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// `disconnect()` was called locally
    Local,
    /// The signer deleted the session
    RemoteDelete(Option<String>),
    /// The relay expired the session
    RemoteExpire,
}

/// Session events for collaborators
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A pairing was approved
    Connected { session: Session },
    /// A persisted session was restored by `init()`
    Restored { session: Session },
    /// The live session ended
    Disconnected {
        topic: String,
        reason: DisconnectReason,
    },
}

/// Handle returned by `subscribe`, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Observer list
pub struct SessionEvents {
    subscribers: Mutex<HashMap<SubscriptionId, mpsc::UnboundedSender<SessionEvent>>>,
    next_id: AtomicU64,
}

impl SessionEvents {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a new subscriber
    pub async fn subscribe(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<SessionEvent>) {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().await.insert(id, tx);
        (id, rx)
    }

    /// Remove a subscriber; returns false if it was already gone
    pub async fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscribers.lock().await.remove(&id).is_some()
    }

    /// Deliver an event to every live subscriber, dropping closed ones
    pub async fn publish(&self, event: SessionEvent) {
        let mut subscribers = self.subscribers.lock().await;
        subscribers.retain(|id, tx| {
            let delivered = tx.send(event.clone()).is_ok();
            if !delivered {
                debug!("Dropping closed session subscriber {:?}", id);
            }
            delivered
        });
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.lock().await.len()
    }
}

impl Default for SessionEvents {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn disconnected() -> SessionEvent {
        SessionEvent::Disconnected {
            topic: "t".to_string(),
            reason: DisconnectReason::RemoteExpire,
        }
    }

    #[tokio::test]
    async fn test_fan_out_to_all_subscribers() {
        let events = SessionEvents::new();
        let (_, mut first) = events.subscribe().await;
        let (_, mut second) = events.subscribe().await;

        events.publish(disconnected()).await;

        assert_eq!(first.recv().await, Some(disconnected()));
        assert_eq!(second.recv().await, Some(disconnected()));
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let events = SessionEvents::new();
        let (id, mut rx) = events.subscribe().await;

        assert!(events.unsubscribe(id).await);
        assert!(!events.unsubscribe(id).await);

        events.publish(disconnected()).await;
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_closed_receivers_are_pruned() {
        let events = SessionEvents::new();
        let (_, rx) = events.subscribe().await;
        drop(rx);

        events.publish(disconnected()).await;
        assert_eq!(events.subscriber_count().await, 0);
    }
}
