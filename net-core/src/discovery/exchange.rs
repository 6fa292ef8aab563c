//! Rate-limited address request/response handling (spec §4.7).

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::config::ExchangeConfig;
use crate::peer::AddressBook;
use crate::protocol::message::{GetPeersMessage, PeerEntry, PeersMessage};
use crate::protocol::now_unix;
use crate::relay::RateLimiter;

/// Answers `GetPeers` requests against the address book, enforcing both a
/// token bucket and a minimum interval per requester.
pub struct PeerExchange {
    address_book: Arc<AddressBook>,
    rate_limiter: RateLimiter,
    last_request: Mutex<HashMap<String, i64>>,
    config: ExchangeConfig,
}

impl PeerExchange {
    pub fn new(address_book: Arc<AddressBook>, config: ExchangeConfig) -> Self {
        let rate_limiter = RateLimiter::new(crate::config::RateLimiterConfig {
            max_tokens: config.max_tokens,
            refill_amount: config.refill_amount,
            refill_interval: config.refill_interval,
        });
        Self {
            address_book,
            rate_limiter,
            last_request: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Build a `Peers` response for `req`, or an empty one if `requester`
    /// is currently rate-limited.
    pub async fn handle_peer_request(&self, req: &GetPeersMessage, requester: &str) -> PeersMessage {
        if !self.allow(requester).await {
            return PeersMessage::new(Vec::new()).expect("empty entries always valid");
        }

        let max_count = (req.max_count as usize).min(1000);
        let addresses = self
            .address_book
            .get_best_addresses(max_count, &req.exclude_addresses)
            .await;
        let entries: Vec<PeerEntry> = addresses
            .iter()
            .map(|a| PeerEntry::from_endpoint(&a.endpoint))
            .collect();
        PeersMessage::new(entries).unwrap_or_else(|_| PeersMessage::new(Vec::new()).unwrap())
    }

    async fn allow(&self, requester: &str) -> bool {
        if !self.rate_limiter.try_consume(requester, 1).await {
            return false;
        }
        let now = now_unix();
        let min_interval = self.config.min_request_interval.as_secs() as i64;
        let mut last_request = self.last_request.lock().await;
        match last_request.get(requester) {
            Some(&last) if now - last < min_interval => false,
            _ => {
                last_request.insert(requester.to_string(), now);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AddressBookConfig;
    use std::time::Duration;

    fn book() -> Arc<AddressBook> {
        Arc::new(AddressBook::new(AddressBookConfig {
            max_addresses: 100,
            allow_private: true,
            max_addresses_per_subnet: 100,
            persistence_path: None,
        }))
    }

    #[tokio::test]
    async fn returns_best_addresses_up_to_requested_count() {
        let book = book();
        book.add("1.1.1.1:1".parse().unwrap(), "seed").await.unwrap();
        book.add("2.2.2.2:2".parse().unwrap(), "seed").await.unwrap();
        let exchange = PeerExchange::new(book, ExchangeConfig::default());
        let req = GetPeersMessage::new(1, vec![]).unwrap();
        let resp = exchange.handle_peer_request(&req, "requester").await;
        assert_eq!(resp.entries.len(), 1);
    }

    #[tokio::test]
    async fn min_interval_blocks_rapid_repeats() {
        let book = book();
        book.add("1.1.1.1:1".parse().unwrap(), "seed").await.unwrap();
        let exchange = PeerExchange::new(
            book,
            ExchangeConfig {
                min_request_interval: Duration::from_secs(300),
                ..ExchangeConfig::default()
            },
        );
        let req = GetPeersMessage::new(10, vec![]).unwrap();
        let first = exchange.handle_peer_request(&req, "requester").await;
        assert_eq!(first.entries.len(), 1);
        let second = exchange.handle_peer_request(&req, "requester").await;
        assert!(second.entries.is_empty());
    }

    #[tokio::test]
    async fn token_bucket_exhaustion_returns_empty() {
        let book = book();
        book.add("1.1.1.1:1".parse().unwrap(), "seed").await.unwrap();
        let exchange = PeerExchange::new(
            book,
            ExchangeConfig {
                max_tokens: 1,
                min_request_interval: Duration::from_millis(1),
                ..ExchangeConfig::default()
            },
        );
        let req = GetPeersMessage::new(10, vec![]).unwrap();
        let first = exchange.handle_peer_request(&req, "requester").await;
        assert_eq!(first.entries.len(), 1);
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = exchange.handle_peer_request(&req, "requester").await;
        assert!(second.entries.is_empty());
    }
}
