//! Per-peer and global bandwidth caps, reset at each wall-clock second
//! boundary (spec §4.10).

use std::collections::HashMap;

use tokio::sync::Mutex;

use crate::config::BandwidthConfig;

#[derive(Default)]
struct PeerCounter {
    bytes_this_second: u64,
    total_bytes: u64,
    second: i64,
}

struct Inner {
    peers: HashMap<String, PeerCounter>,
    global_this_second: u64,
    global_second: i64,
}

/// Tracks outbound bytes per peer and globally, enforcing both caps
/// independently. Counters reset whenever the wall-clock second advances.
pub struct BandwidthMonitor {
    inner: Mutex<Inner>,
    config: BandwidthConfig,
}

fn current_second() -> i64 {
    crate::protocol::now_unix()
}

impl BandwidthMonitor {
    pub fn new(config: BandwidthConfig) -> Self {
        Self {
            inner: Mutex::new(Inner {
                peers: HashMap::new(),
                global_this_second: 0,
                global_second: current_second(),
            }),
            config,
        }
    }

    /// Whether sending `bytes` more to `peer` right now would stay within
    /// both the per-peer and the global cap.
    pub async fn can_send(&self, peer: &str, bytes: u64) -> bool {
        let now = current_second();
        let mut inner = self.inner.lock().await;
        reset_if_elapsed(&mut inner, peer, now);
        let peer_counter = inner.peers.entry(peer.to_string()).or_default();
        peer_counter.bytes_this_second + bytes <= self.config.max_bytes_per_second_per_peer
            && inner.global_this_second + bytes <= self.config.max_total_bytes_per_second
    }

    /// Record that `bytes` were sent to `peer`, incrementing both counters.
    pub async fn record_sent(&self, peer: &str, bytes: u64) {
        let now = current_second();
        let mut inner = self.inner.lock().await;
        reset_if_elapsed(&mut inner, peer, now);
        inner.global_this_second += bytes;
        let counter = inner.peers.entry(peer.to_string()).or_default();
        counter.bytes_this_second += bytes;
        counter.total_bytes += bytes;
    }

    pub async fn total_bytes(&self, peer: &str) -> u64 {
        self.inner
            .lock()
            .await
            .peers
            .get(peer)
            .map(|c| c.total_bytes)
            .unwrap_or(0)
    }
}

fn reset_if_elapsed(inner: &mut Inner, peer: &str, now: i64) {
    if inner.global_second != now {
        inner.global_second = now;
        inner.global_this_second = 0;
    }
    let counter = inner.peers.entry(peer.to_string()).or_default();
    if counter.second != now {
        counter.second = now;
        counter.bytes_this_second = 0;
    }
}
