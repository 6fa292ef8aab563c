//! Seed-based bootstrap discovery (spec §4.7).

use std::sync::Arc;
use std::time::Duration;

use crate::peer::{AddressBook, PeerManager};
use crate::protocol::message::GetPeersMessage;
use crate::protocol::{Endpoint, Message};
use crate::transport::ConnectionManager;

/// Dials a fixed seed list and registers whatever addresses each seed
/// hands back. Individual seed failures are swallowed; discovery never
/// fails outright just because some seeds were unreachable.
pub struct PeerDiscovery {
    seeds: Vec<Endpoint>,
    connection_manager: Arc<ConnectionManager>,
    peer_manager: Arc<PeerManager>,
    address_book: Arc<AddressBook>,
    connect_timeout: Duration,
}

impl PeerDiscovery {
    pub fn new(
        seeds: Vec<Endpoint>,
        connection_manager: Arc<ConnectionManager>,
        peer_manager: Arc<PeerManager>,
        address_book: Arc<AddressBook>,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            seeds,
            connection_manager,
            peer_manager,
            address_book,
            connect_timeout,
        }
    }

    /// Dial every seed concurrently, round-trip `GetPeers`/`Peers`, and
    /// register every returned address.
    #[tracing::instrument(skip(self))]
    pub async fn discover_peers(&self) {
        let attempts = self.seeds.iter().map(|seed| self.try_seed(*seed));
        futures::future::join_all(attempts).await;
    }

    async fn try_seed(&self, seed: Endpoint) {
        let conn = match self.connection_manager.connect(seed, self.connect_timeout).await {
            Ok(Some(conn)) => conn,
            Ok(None) => {
                tracing::debug!(%seed, "skipped: connection manager at capacity");
                return;
            }
            Err(e) => {
                tracing::debug!(%seed, error = %e, "seed dial failed");
                return;
            }
        };

        let request = match GetPeersMessage::new(1000, vec![]) {
            Ok(req) => req,
            Err(_) => return,
        };
        if !conn.send(Message::get_peers(request)).await {
            return;
        }

        let reply = tokio::time::timeout(self.connect_timeout, conn.receive()).await;
        let Ok(Some(Message::Peers(peers, _))) = reply else {
            return;
        };

        for entry in &peers.entries {
            if let Ok(endpoint) = entry.to_endpoint() {
                self.peer_manager.add(conn.id(), endpoint).await;
                let _ = self.address_book.add(endpoint, format!("discovery:{seed}")).await;
            }
        }
    }
}
