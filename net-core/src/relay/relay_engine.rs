//! Validate → dedup → enqueue → background-send pipeline (spec §4.12).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::task::JoinHandle;
use tracing::instrument;

use crate::peer::PeerManager;
use crate::protocol::{Message, MessageType, Priority};
use crate::relay::bandwidth::BandwidthMonitor;
use crate::relay::priority_queue::PriorityMessageQueue;
use crate::relay::rate_limiter::RateLimiter;
use crate::relay::tracker::MessageTracker;
use crate::transport::ConnectionManager;
use crate::validation;

/// Types eligible for network-wide relay (spec §4.12).
fn is_relayable_type(ty: MessageType) -> bool {
    matches!(
        ty,
        MessageType::Block
            | MessageType::NewBlock
            | MessageType::Transaction
            | MessageType::ProofSubmission
            | MessageType::BlockAccepted
    )
}

/// A read-only snapshot of the relay engine's monotonic counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct RelayStats {
    pub total_messages_relayed: u64,
    pub total_duplicates_filtered: u64,
    pub total_messages_dropped: u64,
}

/// Validates, deduplicates, rate- and bandwidth-limits, and relays
/// eligible messages to every other connected peer. Exactly one
/// background worker runs for the engine's lifetime, from construction
/// until `shutdown`.
pub struct MessageRelay {
    tracker: MessageTracker,
    rate_limiter: RateLimiter,
    bandwidth: BandwidthMonitor,
    queue: Arc<PriorityMessageQueue>,
    connection_manager: Arc<ConnectionManager>,
    peer_manager: Arc<PeerManager>,
    relayed: AtomicU64,
    duplicates_filtered: AtomicU64,
    dropped: AtomicU64,
    worker: StdMutex<Option<JoinHandle<()>>>,
}

impl MessageRelay {
    pub fn new(
        tracker: MessageTracker,
        rate_limiter: RateLimiter,
        bandwidth: BandwidthMonitor,
        connection_manager: Arc<ConnectionManager>,
        peer_manager: Arc<PeerManager>,
    ) -> Arc<Self> {
        let relay = Arc::new(Self {
            tracker,
            rate_limiter,
            bandwidth,
            queue: Arc::new(PriorityMessageQueue::new()),
            connection_manager,
            peer_manager,
            relayed: AtomicU64::new(0),
            duplicates_filtered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            worker: StdMutex::new(None),
        });
        let worker_relay = Arc::clone(&relay);
        let handle = tokio::spawn(async move { Self::run_worker(worker_relay).await });
        *relay.worker.lock().expect("worker mutex poisoned") = Some(handle);
        relay
    }

    /// Whether `m` is currently eligible for relay: structurally valid,
    /// not already seen, and of a relayable type.
    pub async fn should_relay(&self, m: &Message) -> bool {
        validation::validate(m) && !self.tracker.has_seen(m).await && is_relayable_type(m.message_type())
    }

    /// Forward `m` to every connection other than `source` (if any).
    #[instrument(skip(self, m), fields(msg_type = ?m.message_type()))]
    pub async fn broadcast(&self, m: Message, source: Option<&str>) {
        if !validation::validate(&m) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.tracker.mark_and_check_if_new(&m).await;
        let priority = Priority::for_message_type(m.message_type());
        for conn in self.connection_manager.get_active_connections().await {
            if source.map(|s| s == conn.id()).unwrap_or(false) {
                continue;
            }
            self.queue.enqueue(m.clone(), conn.id().to_string(), priority).await;
        }
    }

    /// Validate, dedup, rate-limit and relay a message received from
    /// `source`. Returns whether it was accepted for relay.
    #[instrument(skip(self, m), fields(msg_type = ?m.message_type(), source))]
    pub async fn relay(&self, m: Message, source: &str) -> bool {
        if !validation::validate(&m) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        if self.tracker.has_seen(&m).await {
            self.duplicates_filtered.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        if !is_relayable_type(m.message_type()) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        if !self.rate_limiter.try_consume(source, 1).await {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            self.peer_manager.record_failure(source).await;
            return false;
        }
        self.tracker.mark_and_check_if_new(&m).await;
        self.broadcast(m, Some(source)).await;
        true
    }

    /// Current counters; monotonic for the process lifetime.
    pub fn stats(&self) -> RelayStats {
        RelayStats {
            total_messages_relayed: self.relayed.load(Ordering::Relaxed),
            total_duplicates_filtered: self.duplicates_filtered.load(Ordering::Relaxed),
            total_messages_dropped: self.dropped.load(Ordering::Relaxed),
        }
    }

    async fn run_worker(relay: Arc<Self>) {
        loop {
            let Some(item) = relay.queue.dequeue().await else {
                tracing::info!("relay worker shutting down");
                break;
            };
            let Some(conn) = relay.connection_manager.get_connection(&item.peer_id).await else {
                continue;
            };
            if !conn.is_connected() {
                continue;
            }
            let size = item.message.payload().len() as u64 + 5;
            if !relay.bandwidth.can_send(&item.peer_id, size).await {
                relay.dropped.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            if conn.send(item.message).await {
                relay.bandwidth.record_sent(&item.peer_id, size).await;
                relay.relayed.fetch_add(1, Ordering::Relaxed);
                relay.peer_manager.record_success(&item.peer_id).await;
            } else {
                relay.dropped.fetch_add(1, Ordering::Relaxed);
                relay.peer_manager.record_failure(&item.peer_id).await;
            }
        }
    }

    /// Stop accepting new work and await the background worker's exit.
    /// Pending queued items are discarded.
    pub async fn shutdown(&self) {
        self.queue.shutdown();
        let handle = self.worker.lock().expect("worker mutex poisoned").take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BandwidthConfig, ConnectionConfig, PeerManagerConfig, RateLimiterConfig, TlsConfig, TrackerConfig};
    use crate::protocol::message::TransactionBlob;

    fn new_relay() -> Arc<MessageRelay> {
        let peer_manager = Arc::new(PeerManager::new(PeerManagerConfig::default()));
        let connection_manager = ConnectionManager::new(
            ConnectionConfig::default(),
            TlsConfig::default(),
            Arc::clone(&peer_manager),
        );
        MessageRelay::new(
            MessageTracker::new(TrackerConfig::default()),
            RateLimiter::new(RateLimiterConfig::default()),
            BandwidthMonitor::new(BandwidthConfig::default()),
            connection_manager,
            peer_manager,
        )
    }

    #[tokio::test]
    async fn relay_rejects_non_relayable_type() {
        let relay = new_relay();
        let msg = crate::protocol::Message::heartbeat();
        assert!(!relay.should_relay(&msg).await);
        assert!(!relay.relay(msg, "peer").await);
        relay.shutdown().await;
    }

    #[tokio::test]
    async fn relay_counts_duplicates() {
        let relay = new_relay();
        let msg = crate::protocol::Message::transaction(TransactionBlob::new(vec![1]).unwrap());
        assert!(relay.relay(msg.clone(), "peer").await);
        assert!(!relay.relay(msg, "peer").await);
        assert_eq!(relay.stats().total_duplicates_filtered, 1);
        relay.shutdown().await;
    }

    #[tokio::test]
    async fn relay_rate_limits_source() {
        let relay = new_relay();
        for i in 0..100u8 {
            let msg = crate::protocol::Message::transaction(TransactionBlob::new(vec![i]).unwrap());
            relay.relay(msg, "spammer").await;
        }
        let msg = crate::protocol::Message::transaction(TransactionBlob::new(vec![255]).unwrap());
        assert!(!relay.relay(msg, "spammer").await);
        relay.shutdown().await;
    }
}
