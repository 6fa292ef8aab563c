//! Periodic address push with a sliding dedup window (spec §4.7).

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::GossiperConfig;
use crate::peer::AddressBook;
use crate::protocol::message::{PeerEntry, PeersMessage};
use crate::protocol::{now_unix, Endpoint, Message};
use crate::transport::ConnectionManager;

/// Periodically pushes known addresses to every connected peer, and
/// folds received addresses back into the address book with dedup.
pub struct PeerGossiper {
    address_book: Arc<AddressBook>,
    connection_manager: Arc<ConnectionManager>,
    config: GossiperConfig,
    recently_gossiped: Mutex<HashMap<Endpoint, i64>>,
    task: Mutex<Option<JoinHandle<()>>>,
    shutdown: CancellationToken,
}

impl PeerGossiper {
    pub fn new(address_book: Arc<AddressBook>, connection_manager: Arc<ConnectionManager>, config: GossiperConfig) -> Arc<Self> {
        Arc::new(Self {
            address_book,
            connection_manager,
            config,
            recently_gossiped: Mutex::new(HashMap::new()),
            task: Mutex::new(None),
            shutdown: CancellationToken::new(),
        })
    }

    /// Launch the background push loop. Idempotent-ish: calling twice
    /// replaces the previous task handle (the old loop keeps running
    /// until cancelled by `stop`, matching the single shared
    /// `CancellationToken`).
    pub async fn start(self: &Arc<Self>) {
        let gossiper = Arc::clone(self);
        let shutdown = self.shutdown.clone();
        let interval = self.config.gossip_interval;
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        gossiper.gossip_once().await;
                    }
                }
            }
        });
        *self.task.lock().await = Some(handle);
    }

    #[tracing::instrument(skip(self))]
    async fn gossip_once(&self) {
        let addresses = self
            .address_book
            .get_best_addresses(self.config.addresses_per_gossip, &[])
            .await;
        let entries: Vec<PeerEntry> = addresses.iter().map(|a| PeerEntry::from_endpoint(&a.endpoint)).collect();
        let Ok(peers_msg) = PeersMessage::new(entries) else {
            return;
        };
        let msg = Message::peers(peers_msg);
        for conn in self.connection_manager.get_active_connections().await {
            conn.send(msg.clone()).await;
        }
    }

    /// Fold a batch of addresses received from `sender_id` into the
    /// address book, deduplicated against a sliding window.
    pub async fn process_received_addresses(&self, endpoints: Vec<Endpoint>, sender_id: &str) {
        let now = now_unix();
        let window = self.config.dedup_window.as_secs() as i64;
        let mut seen = self.recently_gossiped.lock().await;
        for endpoint in endpoints {
            match seen.get(&endpoint) {
                Some(&last) if now - last <= window => {
                    self.address_book.record_success(&endpoint).await;
                }
                _ => {
                    let source = format!("gossip:{sender_id}");
                    let _ = self.address_book.add(endpoint, source).await;
                }
            }
            seen.insert(endpoint, now);
        }
    }

    pub async fn stop(&self) {
        self.shutdown.cancel();
        if let Some(handle) = self.task.lock().await.take() {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConnectionConfig, PeerManagerConfig, TlsConfig};
    use crate::peer::PeerManager;

    #[tokio::test]
    async fn process_received_addresses_dedupes_within_window() {
        let book = Arc::new(AddressBook::new(crate::config::AddressBookConfig {
            allow_private: true,
            ..Default::default()
        }));
        let peer_manager = Arc::new(PeerManager::new(PeerManagerConfig::default()));
        let connection_manager = ConnectionManager::new(ConnectionConfig::default(), TlsConfig::default(), peer_manager);
        let gossiper = PeerGossiper::new(book.clone(), connection_manager, GossiperConfig::default());

        let ep: Endpoint = "3.3.3.3:8333".parse().unwrap();
        gossiper.process_received_addresses(vec![ep], "peer-a").await;
        assert_eq!(book.len().await, 1);
        assert_eq!(book.get(&ep).await.unwrap().source, "gossip:peer-a");

        // Second sighting within the window updates, doesn't re-add.
        gossiper.process_received_addresses(vec![ep], "peer-b").await;
        assert_eq!(book.len().await, 1);
    }
}
