//! Runtime peer state and reputation management (spec §4.3).

pub mod address_book;

pub use address_book::{AddressBook, PeerAddress};

use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::config::PeerManagerConfig;
use crate::protocol::{now_unix, Endpoint};

/// Runtime state for one known peer. Mutated only through `PeerManager`;
/// no other code writes these fields (spec §3, §9).
#[derive(Debug, Clone, PartialEq)]
pub struct PeerInfo {
    pub id: String,
    pub endpoint: Endpoint,
    pub protocol_version: i32,
    pub reputation_score: i32,
    pub last_seen: i64,
    pub is_connected: bool,
    pub failure_count: i32,
}

impl PeerInfo {
    pub fn new(id: impl Into<String>, endpoint: Endpoint) -> Self {
        Self {
            id: id.into(),
            endpoint,
            protocol_version: 0,
            reputation_score: 0,
            last_seen: now_unix(),
            is_connected: false,
            failure_count: 0,
        }
    }
}

/// Reputation, connection-state and blacklist tracking for every known
/// peer. Every method is safe to call concurrently (spec §4.3, §5): the
/// map is behind a single `RwLock` and each operation takes the lock for
/// its full read-modify-write.
pub struct PeerManager {
    peers: RwLock<HashMap<String, PeerInfo>>,
    config: PeerManagerConfig,
}

impl PeerManager {
    pub fn new(config: PeerManagerConfig) -> Self {
        Self {
            peers: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Register a new peer, or return the existing one unchanged.
    pub async fn add(&self, id: impl Into<String>, endpoint: Endpoint) -> PeerInfo {
        let id = id.into();
        let mut peers = self.peers.write().await;
        peers
            .entry(id.clone())
            .or_insert_with(|| PeerInfo::new(id, endpoint))
            .clone()
    }

    /// Remove a peer entirely. A no-op for unknown ids.
    pub async fn remove(&self, id: &str) {
        self.peers.write().await.remove(id);
    }

    /// Fetch a snapshot of a peer's state. `None` if unknown.
    pub async fn get(&self, id: &str) -> Option<PeerInfo> {
        self.peers.read().await.get(id).cloned()
    }

    /// Update whether a peer's transport link is currently live.
    pub async fn update_connection_status(&self, id: &str, connected: bool) {
        if let Some(p) = self.peers.write().await.get_mut(id) {
            p.is_connected = connected;
            p.last_seen = now_unix();
        }
    }

    /// Record a successful interaction: reputation up, failures reset.
    pub async fn record_success(&self, id: &str) {
        if let Some(p) = self.peers.write().await.get_mut(id) {
            p.reputation_score += 1;
            p.failure_count = 0;
            p.last_seen = now_unix();
        }
    }

    /// Record a failed interaction: reputation down, failure count up.
    pub async fn record_failure(&self, id: &str) {
        if let Some(p) = self.peers.write().await.get_mut(id) {
            p.reputation_score -= 2;
            p.failure_count += 1;
        }
    }

    /// Whether a peer has crossed the blacklist threshold (spec invariant 9).
    pub async fn should_blacklist(&self, id: &str) -> bool {
        match self.peers.read().await.get(id) {
            Some(p) => {
                p.reputation_score <= self.config.blacklist_threshold
                    || p.failure_count >= self.config.max_failures
            }
            None => false,
        }
    }

    /// Up to `n` non-connected, non-blacklisted peers, best reputation
    /// first, ties broken by least-recently-seen.
    pub async fn get_best_peers(&self, n: usize) -> Vec<PeerInfo> {
        let peers = self.peers.read().await;
        let mut candidates: Vec<PeerInfo> = peers
            .values()
            .filter(|p| {
                !p.is_connected
                    && !(p.reputation_score <= self.config.blacklist_threshold
                        || p.failure_count >= self.config.max_failures)
            })
            .cloned()
            .collect();
        candidates.sort_by(|a, b| {
            b.reputation_score
                .cmp(&a.reputation_score)
                .then(a.last_seen.cmp(&b.last_seen))
        });
        candidates.truncate(n);
        candidates
    }

    /// Evict every peer that should be blacklisted, returning their ids.
    pub async fn evict_blacklisted(&self) -> Vec<String> {
        let mut peers = self.peers.write().await;
        let doomed: Vec<String> = peers
            .values()
            .filter(|p| {
                p.reputation_score <= self.config.blacklist_threshold
                    || p.failure_count >= self.config.max_failures
            })
            .map(|p| p.id.clone())
            .collect();
        for id in &doomed {
            peers.remove(id);
        }
        doomed
    }

    pub async fn len(&self) -> usize {
        self.peers.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ep() -> Endpoint {
        "1.2.3.4:8333".parse().unwrap()
    }

    #[tokio::test]
    async fn unknown_peer_operations_are_safe() {
        let pm = PeerManager::new(PeerManagerConfig::default());
        assert!(pm.get("ghost").await.is_none());
        pm.update_connection_status("ghost", true).await;
        pm.record_success("ghost").await;
        pm.record_failure("ghost").await;
        assert!(!pm.should_blacklist("ghost").await);
    }

    #[tokio::test]
    async fn blacklist_by_reputation_or_failures() {
        let pm = PeerManager::new(PeerManagerConfig::default());
        pm.add("p1", ep()).await;
        for _ in 0..6 {
            pm.record_failure("p1").await;
        }
        assert!(pm.should_blacklist("p1").await);

        pm.add("p2", ep()).await;
        for _ in 0..11 {
            pm.record_failure("p2").await;
        }
        // failure_count alone already trips max_failures well before
        // reputation crosses -10; both paths converge to blacklisted.
        assert!(pm.should_blacklist("p2").await);
    }

    #[tokio::test]
    async fn best_peers_ranked_by_reputation_then_recency() {
        let pm = PeerManager::new(PeerManagerConfig::default());
        pm.add("a", ep()).await;
        pm.add("b", ep()).await;
        pm.record_success("a").await;
        pm.record_success("a").await;
        pm.record_success("b").await;
        let best = pm.get_best_peers(2).await;
        assert_eq!(best[0].id, "a");
        assert_eq!(best[1].id, "b");
    }

    #[tokio::test]
    async fn connected_peers_excluded_from_best_peers() {
        let pm = PeerManager::new(PeerManagerConfig::default());
        pm.add("a", ep()).await;
        pm.update_connection_status("a", true).await;
        assert!(pm.get_best_peers(10).await.is_empty());
    }
}
