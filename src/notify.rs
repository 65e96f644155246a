//! Change notification topics.
//!
//! A `Topic` is a typed broadcast channel: publishing never blocks and never
//! fails, and each subscriber holds an independent receiver. Dropping a
//! receiver is the unsubscription — streaming consumers that tear down
//! release their delivery slot automatically.

use tokio::sync::broadcast;

/// A broadcast channel carrying state-change notifications.
#[derive(Debug)]
pub struct Topic<T> {
    sender: broadcast::Sender<T>,
}

impl<T: Clone> Topic<T> {
    /// Create a topic that buffers up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Start receiving events published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        self.sender.subscribe()
    }

    /// Publish an event to all current subscribers. Having no subscribers is
    /// not an error; the event is simply dropped.
    pub fn publish(&self, event: T) {
        let _ = self.sender.send(event);
    }

    /// Number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl<T: Clone> Default for Topic<T> {
    fn default() -> Self {
        Self::new(16)
    }
}
