//! Peer-to-peer networking core for a proof-of-space-time blockchain node.
//!
//! This crate owns four tightly coupled subsystems: the wire message codec
//! (`protocol`), the connection and peer-quality layer (`transport`,
//! `peer`, `discovery`), the relay/broadcast layer (`relay`), and the
//! block synchronizer (`sync`). Everything outside those boundaries --
//! the chain/block/transaction data model, signature verification, the
//! on-disk chain store, the block validator, plotting, the CLI, logging
//! setup, metrics export, config file parsing, and TLS certificate
//! provisioning -- is consumed only through the trait contracts in
//! `contracts`; none of it is reimplemented here.

pub mod config;
pub mod contracts;
pub mod discovery;
pub mod error;
pub mod peer;
pub mod protocol;
pub mod relay;
pub mod sync;
pub mod transport;
pub mod validation;

pub use config::NetworkConfig;
pub use contracts::{
    BlockCodec, BlockValidator, ChainAccountStore, ChainBlockStore, ChainMetadataStore,
    ChainTransactionIndex, DecodedHeader, HeaderCodec, Storage, ValidationOutcome, WriteBatch,
};
pub use discovery::{PeerDiscovery, PeerExchange, PeerGossiper};
pub use error::{NetworkError, NetworkResult, SyncError, SyncResult};
pub use peer::{AddressBook, PeerAddress, PeerInfo, PeerManager};
pub use protocol::{decode_frame, encode_frame, Endpoint, Message, MessageType, Priority};
pub use relay::{BandwidthMonitor, MessageRelay, MessageTracker, PriorityMessageQueue, RateLimiter, RelayStats};
pub use sync::{BlockDownloadRequest, BlockSynchronizer, SyncProgress, SyncState};
pub use transport::{ConnectionManager, PeerConnection};
