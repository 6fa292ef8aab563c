//! Persistent catalog of known peer addresses with subnet diversity and
//! quality-based eviction (spec §4.4).

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::instrument;

use crate::config::AddressBookConfig;
use crate::error::{NetworkError, NetworkResult};
use crate::protocol::{now_unix, Endpoint};

const CURRENT_SCHEMA_VERSION: u32 = 1;

/// One catalog entry. Immutable updates-by-copy: the book replaces the
/// whole value on every mutation rather than mutating fields in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerAddress {
    pub endpoint: Endpoint,
    pub first_seen: i64,
    pub last_seen: i64,
    pub last_attempt: Option<i64>,
    pub success_count: u32,
    pub failure_count: u32,
    pub source: String,
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
}

fn default_schema_version() -> u32 {
    1
}

impl PeerAddress {
    pub fn new(endpoint: Endpoint, source: impl Into<String>) -> Self {
        let now = now_unix();
        Self {
            endpoint,
            first_seen: now,
            last_seen: now,
            last_attempt: None,
            success_count: 0,
            failure_count: 0,
            source: source.into(),
            schema_version: CURRENT_SCHEMA_VERSION,
        }
    }

    /// Success ratio, defaulting to 0.5 when untested (spec glossary).
    pub fn quality_score(&self) -> f64 {
        let total = self.success_count + self.failure_count;
        if total == 0 {
            0.5
        } else {
            self.success_count as f64 / total as f64
        }
    }

    fn with_success(&self) -> Self {
        let mut next = self.clone();
        next.success_count += 1;
        next.last_seen = now_unix();
        next.last_attempt = Some(next.last_seen);
        next
    }

    fn with_failure(&self) -> Self {
        let mut next = self.clone();
        next.failure_count += 1;
        next.last_attempt = Some(now_unix());
        next
    }
}

/// On-disk record shape. Identical field set to `PeerAddress`, kept as a
/// distinct type so the wire/runtime shape can diverge from the
/// persistence shape without ceremony (teacher convention: persisted
/// records are plain `serde` structs with every field `pub`).
#[derive(Debug, Clone, Serialize, Deserialize)]
struct AddressRecord {
    address: String,
    port: u16,
    first_seen: i64,
    last_seen: i64,
    last_attempt: Option<i64>,
    success_count: u32,
    failure_count: u32,
    source: String,
    #[serde(default = "default_schema_version")]
    schema_version: u32,
}

impl From<&PeerAddress> for AddressRecord {
    fn from(a: &PeerAddress) -> Self {
        Self {
            address: a.endpoint.ip.to_string(),
            port: a.endpoint.port,
            first_seen: a.first_seen,
            last_seen: a.last_seen,
            last_attempt: a.last_attempt,
            success_count: a.success_count,
            failure_count: a.failure_count,
            source: a.source.clone(),
            schema_version: a.schema_version,
        }
    }
}

impl AddressRecord {
    /// Parse back into a `PeerAddress`. Malformed records (bad address)
    /// return `None` so the loader can skip them rather than abort.
    fn into_peer_address(self) -> Option<PeerAddress> {
        let ip: std::net::IpAddr = self.address.parse().ok()?;
        Some(PeerAddress {
            endpoint: Endpoint::new(ip, self.port),
            first_seen: self.first_seen,
            last_seen: self.last_seen,
            last_attempt: self.last_attempt,
            success_count: self.success_count,
            failure_count: self.failure_count,
            source: self.source,
            schema_version: self.schema_version,
        })
    }
}

/// Durable catalog of known peer addresses: diversity-limited, capacity
/// bounded, persisted as a JSON sequence of records.
pub struct AddressBook {
    entries: RwLock<HashMap<Endpoint, PeerAddress>>,
    config: AddressBookConfig,
}

impl AddressBook {
    pub fn new(config: AddressBookConfig) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Insert or refresh an address. Rejects non-routable addresses
    /// (unless `allow_private`) and subnet-saturated ones; evicts the
    /// lowest-quality, then oldest, entry on overflow.
    #[instrument(skip(self), fields(endpoint = %endpoint))]
    pub async fn add(&self, endpoint: Endpoint, source: impl Into<String>) -> NetworkResult<bool> {
        if !self.config.allow_private && !endpoint.is_routable() {
            return Err(NetworkError::Protocol(format!(
                "address {endpoint} is not routable and allow_private is disabled"
            )));
        }

        let mut entries = self.entries.write().await;
        if let Some(existing) = entries.get_mut(&endpoint) {
            existing.last_seen = now_unix();
            return Ok(false);
        }

        let subnet = endpoint.subnet_key();
        let in_subnet = entries
            .values()
            .filter(|a| a.endpoint.subnet_key() == subnet)
            .count();
        if in_subnet >= self.config.max_addresses_per_subnet {
            return Err(NetworkError::Protocol(format!(
                "subnet {subnet} already has {in_subnet} addresses"
            )));
        }

        if entries.len() >= self.config.max_addresses {
            evict_worst(&mut entries);
        }

        entries.insert(endpoint, PeerAddress::new(endpoint, source));
        Ok(true)
    }

    pub async fn record_success(&self, endpoint: &Endpoint) {
        let mut entries = self.entries.write().await;
        if let Some(a) = entries.get(endpoint) {
            let updated = a.with_success();
            entries.insert(*endpoint, updated);
        }
    }

    pub async fn record_failure(&self, endpoint: &Endpoint) {
        let mut entries = self.entries.write().await;
        if let Some(a) = entries.get(endpoint) {
            let updated = a.with_failure();
            entries.insert(*endpoint, updated);
        }
    }

    pub async fn get(&self, endpoint: &Endpoint) -> Option<PeerAddress> {
        self.entries.read().await.get(endpoint).cloned()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Up to `count` addresses, best quality first, excluding any whose
    /// `"ip:port"` string appears in `exclude`.
    pub async fn get_best_addresses(&self, count: usize, exclude: &[String]) -> Vec<PeerAddress> {
        let entries = self.entries.read().await;
        let mut candidates: Vec<PeerAddress> = entries
            .values()
            .filter(|a| !exclude.iter().any(|x| x == &a.endpoint.to_string()))
            .cloned()
            .collect();
        candidates.sort_by(|a, b| {
            b.quality_score()
                .partial_cmp(&a.quality_score())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        candidates.truncate(count);
        candidates
    }

    /// Drop every address not seen within `max_age`.
    pub async fn remove_stale(&self, max_age: std::time::Duration) {
        let cutoff = now_unix() - max_age.as_secs() as i64;
        self.entries.write().await.retain(|_, a| a.last_seen >= cutoff);
    }

    /// Drop addresses with at least `min_attempts` attempts and quality
    /// below `min_quality`.
    pub async fn remove_poor_quality(&self, min_quality: f64, min_attempts: u32) {
        self.entries.write().await.retain(|_, a| {
            let attempts = a.success_count + a.failure_count;
            attempts < min_attempts || a.quality_score() >= min_quality
        });
    }

    /// Persist the catalog as a JSON array, writing to a temp file in the
    /// same directory then renaming over the destination (spec §5).
    pub async fn save(&self) -> NetworkResult<()> {
        let Some(path) = &self.config.persistence_path else {
            return Ok(());
        };
        let records: Vec<AddressRecord> = {
            let entries = self.entries.read().await;
            entries.values().map(AddressRecord::from).collect()
        };
        let json = serde_json::to_vec_pretty(&records)?;
        let tmp_path = tmp_path_for(path);
        tokio::fs::write(&tmp_path, &json).await?;
        tokio::fs::rename(&tmp_path, path).await?;
        Ok(())
    }

    /// Load the catalog from disk, skipping any record that fails to
    /// parse rather than aborting the whole load.
    pub async fn load(&self) -> NetworkResult<()> {
        let Some(path) = &self.config.persistence_path else {
            return Ok(());
        };
        let bytes = match tokio::fs::read(path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let raw: Vec<serde_json::Value> = serde_json::from_slice(&bytes)?;
        let mut entries = self.entries.write().await;
        for value in raw {
            let Ok(record) = serde_json::from_value::<AddressRecord>(value) else {
                continue;
            };
            if let Some(addr) = record.into_peer_address() {
                entries.insert(addr.endpoint, addr);
            }
        }
        Ok(())
    }
}

fn evict_worst(entries: &mut HashMap<Endpoint, PeerAddress>) {
    if let Some(worst) = entries
        .values()
        .min_by(|a, b| {
            a.quality_score()
                .partial_cmp(&b.quality_score())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.last_seen.cmp(&b.last_seen))
        })
        .map(|a| a.endpoint)
    {
        entries.remove(&worst);
    }
}

fn tmp_path_for(path: &Path) -> std::path::PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    std::path::PathBuf::from(tmp)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(max_per_subnet: usize, allow_private: bool) -> AddressBookConfig {
        AddressBookConfig {
            max_addresses: 100,
            allow_private,
            max_addresses_per_subnet: max_per_subnet,
            persistence_path: None,
        }
    }

    #[tokio::test]
    async fn s8_subnet_diversity_rejects_third_address() {
        let book = AddressBook::new(cfg(2, true));
        assert!(book
            .add("10.0.0.1:8333".parse().unwrap(), "seed")
            .await
            .unwrap());
        assert!(book
            .add("10.0.0.2:8333".parse().unwrap(), "seed")
            .await
            .unwrap());
        assert!(book.add("10.0.0.3:8333".parse().unwrap(), "seed").await.is_err());
    }

    #[tokio::test]
    async fn private_addresses_rejected_unless_allowed() {
        let book = AddressBook::new(cfg(10, false));
        assert!(book.add("192.168.1.1:8333".parse().unwrap(), "seed").await.is_err());
        let book = AddressBook::new(cfg(10, true));
        assert!(book.add("192.168.1.1:8333".parse().unwrap(), "seed").await.unwrap());
    }

    #[tokio::test]
    async fn quality_score_defaults_to_half_and_tracks_attempts() {
        let book = AddressBook::new(cfg(10, true));
        let ep: Endpoint = "8.8.8.8:8333".parse().unwrap();
        book.add(ep, "seed").await.unwrap();
        assert_eq!(book.get(&ep).await.unwrap().quality_score(), 0.5);
        book.record_success(&ep).await;
        assert_eq!(book.get(&ep).await.unwrap().quality_score(), 1.0);
        book.record_failure(&ep).await;
        assert!((book.get(&ep).await.unwrap().quality_score() - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn overflow_evicts_lowest_quality_then_oldest() {
        let book = AddressBook::new(AddressBookConfig {
            max_addresses: 2,
            allow_private: true,
            max_addresses_per_subnet: 10,
            persistence_path: None,
        });
        let a: Endpoint = "1.1.1.1:1".parse().unwrap();
        let b: Endpoint = "2.2.2.2:2".parse().unwrap();
        let c: Endpoint = "3.3.3.3:3".parse().unwrap();
        book.add(a, "seed").await.unwrap();
        book.add(b, "seed").await.unwrap();
        book.record_failure(&a).await;
        book.add(c, "seed").await.unwrap();
        assert_eq!(book.len().await, 2);
        assert!(book.get(&a).await.is_none());
        assert!(book.get(&b).await.is_some());
        assert!(book.get(&c).await.is_some());
    }

    #[tokio::test]
    async fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("peers.json");
        let book = AddressBook::new(AddressBookConfig {
            persistence_path: Some(path.clone()),
            ..cfg(10, true)
        });
        let ep: Endpoint = "9.9.9.9:8333".parse().unwrap();
        book.add(ep, "seed").await.unwrap();
        book.save().await.unwrap();

        let reloaded = AddressBook::new(AddressBookConfig {
            persistence_path: Some(path),
            ..cfg(10, true)
        });
        reloaded.load().await.unwrap();
        assert_eq!(reloaded.len().await, 1);
        assert!(reloaded.get(&ep).await.is_some());
    }

    #[tokio::test]
    async fn load_skips_malformed_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("peers.json");
        let raw = serde_json::json!([
            {"address": "not-an-ip", "port": 1, "first_seen": 0, "last_seen": 0,
             "success_count": 0, "failure_count": 0, "source": "x"},
            {"address": "5.5.5.5", "port": 8333, "first_seen": 1, "last_seen": 1,
             "success_count": 0, "failure_count": 0, "source": "x"},
        ]);
        tokio::fs::write(&path, serde_json::to_vec(&raw).unwrap())
            .await
            .unwrap();
        let book = AddressBook::new(AddressBookConfig {
            persistence_path: Some(path),
            ..cfg(10, true)
        });
        book.load().await.unwrap();
        assert_eq!(book.len().await, 1);
    }
}
