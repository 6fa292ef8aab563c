//! Configuration surface for every subsystem in the core (spec §6).
//!
//! Every struct here carries the documented defaults verbatim and derives
//! `serde::{Serialize, Deserialize}` so a host binary can load these from a
//! config file; parsing that file is the binary's job, not this crate's.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

fn duration_secs(secs: u64) -> Duration {
    Duration::from_secs(secs)
}

/// `ConnectionManager` tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub max_connections: usize,
    pub use_tls: bool,
    #[serde(with = "duration_secs_serde")]
    pub connection_timeout: Duration,
    #[serde(with = "duration_secs_serde")]
    pub retry_delay: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_connections: 125,
            use_tls: false,
            connection_timeout: duration_secs(10),
            retry_delay: duration_secs(1),
        }
    }
}

/// `PeerManager` reputation tunables.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerManagerConfig {
    pub blacklist_threshold: i32,
    pub max_failures: i32,
}

impl Default for PeerManagerConfig {
    fn default() -> Self {
        Self {
            blacklist_threshold: -10,
            max_failures: 5,
        }
    }
}

/// `AddressBook` capacity, diversity and persistence tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AddressBookConfig {
    pub max_addresses: usize,
    pub allow_private: bool,
    pub max_addresses_per_subnet: usize,
    pub persistence_path: Option<PathBuf>,
}

impl Default for AddressBookConfig {
    fn default() -> Self {
        Self {
            max_addresses: 10_000,
            allow_private: false,
            max_addresses_per_subnet: 10,
            persistence_path: None,
        }
    }
}

/// `PeerExchange` rate-limit tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    #[serde(with = "duration_secs_serde")]
    pub min_request_interval: Duration,
    #[serde(with = "duration_secs_serde")]
    pub request_timeout: Duration,
    pub max_tokens: i32,
    pub refill_amount: i32,
    #[serde(with = "duration_secs_serde")]
    pub refill_interval: Duration,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            min_request_interval: duration_secs(5 * 60),
            request_timeout: duration_secs(10),
            max_tokens: 10,
            refill_amount: 1,
            refill_interval: duration_secs(60),
        }
    }
}

/// `PeerGossiper` tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GossiperConfig {
    #[serde(with = "duration_secs_serde")]
    pub gossip_interval: Duration,
    pub addresses_per_gossip: usize,
    #[serde(with = "duration_secs_serde")]
    pub dedup_window: Duration,
}

impl Default for GossiperConfig {
    fn default() -> Self {
        Self {
            gossip_interval: duration_secs(10 * 60),
            addresses_per_gossip: 20,
            dedup_window: duration_secs(60 * 60),
        }
    }
}

/// `MessageTracker` tunables.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    #[serde(with = "duration_secs_serde")]
    pub message_lifetime: Duration,
    pub max_tracked: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            message_lifetime: duration_secs(5 * 60),
            max_tracked: 100_000,
        }
    }
}

/// Per-peer token bucket tunables, shared by the relay engine and (with its
/// own instance) `PeerExchange`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimiterConfig {
    pub max_tokens: i32,
    pub refill_amount: i32,
    #[serde(with = "duration_secs_serde")]
    pub refill_interval: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            max_tokens: 100,
            refill_amount: 10,
            refill_interval: duration_secs(1),
        }
    }
}

/// `BandwidthMonitor` tunables.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct BandwidthConfig {
    pub max_bytes_per_second_per_peer: u64,
    pub max_total_bytes_per_second: u64,
}

impl Default for BandwidthConfig {
    fn default() -> Self {
        Self {
            max_bytes_per_second_per_peer: 1024 * 1024,
            max_total_bytes_per_second: 10 * 1024 * 1024,
        }
    }
}

/// `BlockSynchronizer` tunables.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub max_peers: usize,
    pub parallel_downloads: usize,
    pub max_headers_per_request: i32,
    pub max_retries: u32,
    pub download_timeout_seconds: u64,
    pub ibd_threshold_blocks: i64,
    pub progress_update_interval_ms: u64,
    pub enable_bandwidth_throttling: bool,
    pub max_bandwidth_bytes_per_second: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_peers: 8,
            parallel_downloads: 4,
            max_headers_per_request: 2000,
            max_retries: 3,
            download_timeout_seconds: 30,
            ibd_threshold_blocks: 1000,
            progress_update_interval_ms: 1000,
            enable_bandwidth_throttling: true,
            max_bandwidth_bytes_per_second: 10 * 1024 * 1024,
        }
    }
}

impl SyncConfig {
    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_seconds)
    }
}

/// Optional TLS wrapping for `ConnectionManager` links. `accept_any_cert`
/// mirrors spec §6's documented default: the crate does not implement a PKI
/// and trusts whatever certificate a peer presents. **Not production-safe.**
#[derive(Debug, Clone, Default)]
pub struct TlsConfig {
    pub enabled: bool,
    pub accept_any_cert: bool,
    /// Server-side identity, required to accept inbound TLS connections.
    /// Certificate provisioning itself is out of scope for this crate; the
    /// host binary builds this and hands it in.
    pub server_config: Option<std::sync::Arc<tokio_rustls::rustls::ServerConfig>>,
}

/// Aggregate configuration for the whole core, grouping every subsystem's
/// config so a host binary can load and pass around a single value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub connection: ConnectionConfig,
    pub peer_manager: PeerManagerConfig,
    pub address_book: AddressBookConfig,
    pub exchange: ExchangeConfig,
    pub gossiper: GossiperConfig,
    pub tracker: TrackerConfig,
    pub rate_limiter: RateLimiterConfig,
    pub bandwidth: BandwidthConfig,
    pub sync: SyncConfig,
}

mod duration_secs_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}
