//! Four bounded priority channels with drop-oldest overflow (spec §4.11).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, Notify};

use crate::protocol::{Message, Priority};

/// A message queued for relay to one peer.
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub message: Message,
    pub peer_id: String,
    pub priority: Priority,
}

/// Default per-channel capacity. Each of the four priority channels is an
/// independent bounded ring buffer.
const DEFAULT_CAPACITY: usize = 10_000;

struct Channels {
    queues: [VecDeque<QueuedMessage>; 4],
    capacity: usize,
}

/// Strict-priority, FIFO-within-priority queue feeding the relay engine's
/// background worker. `dequeue` always returns the oldest item from the
/// highest non-empty priority channel.
pub struct PriorityMessageQueue {
    channels: Mutex<Channels>,
    notify: Notify,
    shutdown: AtomicBool,
}

impl PriorityMessageQueue {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: Mutex::new(Channels {
                queues: Default::default(),
                capacity,
            }),
            notify: Notify::new(),
            shutdown: AtomicBool::new(false),
        }
    }

    /// Insert into the channel for `priority`. Drops the oldest item in
    /// that same channel if it is already at capacity.
    pub async fn enqueue(&self, message: Message, peer_id: impl Into<String>, priority: Priority) {
        let item = QueuedMessage {
            message,
            peer_id: peer_id.into(),
            priority,
        };
        {
            let mut channels = self.channels.lock().await;
            let capacity = channels.capacity;
            let queue = &mut channels.queues[priority.index()];
            if queue.len() >= capacity {
                queue.pop_front();
            }
            queue.push_back(item);
        }
        self.notify.notify_one();
    }

    async fn try_pop(&self) -> Option<QueuedMessage> {
        let mut channels = self.channels.lock().await;
        for priority in Priority::ALL.iter().rev() {
            if let Some(item) = channels.queues[priority.index()].pop_front() {
                return Some(item);
            }
        }
        None
    }

    /// Block until an item is available from the highest non-empty
    /// channel, or the queue has been shut down (returns `None`).
    pub async fn dequeue(&self) -> Option<QueuedMessage> {
        loop {
            if let Some(item) = self.try_pop().await {
                return Some(item);
            }
            if self.shutdown.load(Ordering::Acquire) {
                return None;
            }
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(item) = self.try_pop().await {
                return Some(item);
            }
            if self.shutdown.load(Ordering::Acquire) {
                return None;
            }
            notified.await;
        }
    }

    /// Signal shutdown and wake every waiter; pending items are discarded
    /// by whoever drops the queue.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub async fn len(&self) -> usize {
        self.channels.lock().await.queues.iter().map(|q| q.len()).sum()
    }
}

impl Default for PriorityMessageQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::message::{PingPong, TransactionBlob};

    fn low() -> Message {
        Message::transaction(TransactionBlob::new(vec![1]).unwrap())
    }
    fn critical() -> Message {
        Message::ping(PingPong::new(1, 1))
    }

    #[tokio::test]
    async fn s5_priority_ordering() {
        let queue = PriorityMessageQueue::new();
        queue.enqueue(low(), "peer", Priority::Low).await; // A
        queue.enqueue(critical(), "peer", Priority::Normal).await; // B (Normal)
        queue.enqueue(critical(), "peer", Priority::High).await; // C
        queue.enqueue(critical(), "peer", Priority::Critical).await; // D
        queue.enqueue(low(), "peer", Priority::Low).await; // E

        let order: Vec<Priority> = futures::future::join_all((0..5).map(|_| queue.dequeue()))
            .await
            .into_iter()
            .map(|m| m.unwrap().priority)
            .collect();
        assert_eq!(
            order,
            vec![
                Priority::Critical,
                Priority::High,
                Priority::Normal,
                Priority::Low,
                Priority::Low,
            ]
        );
    }

    #[tokio::test]
    async fn overflow_drops_oldest_in_same_channel() {
        let queue = PriorityMessageQueue::with_capacity(2);
        queue.enqueue(low(), "p", Priority::Low).await;
        queue.enqueue(low(), "p", Priority::Low).await;
        queue.enqueue(low(), "p", Priority::Low).await;
        assert_eq!(queue.len().await, 2);
    }

    #[tokio::test]
    async fn shutdown_unblocks_dequeue() {
        let queue = std::sync::Arc::new(PriorityMessageQueue::new());
        let q2 = queue.clone();
        let handle = tokio::spawn(async move { q2.dequeue().await });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        queue.shutdown();
        assert!(handle.await.unwrap().is_none());
    }
}
