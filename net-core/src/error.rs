//! Error types for the P2P networking core.

use thiserror::Error;

/// Errors surfaced by the codec, transport, peer-quality and relay layers.
#[derive(Error, Debug)]
pub enum NetworkError {
    /// I/O error occurred on a socket or the address-book persistence file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Frame length prefix was invalid or the frame was truncated.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// Type byte did not match any known `MessageType`.
    #[error("unknown message type: 0x{0:02x}")]
    UnknownMessageType(u8),

    /// A constructor or deserializer rejected a field outside its valid range.
    #[error("payload out of range: {0}")]
    PayloadOutOfRange(String),

    /// A per-request deadline elapsed.
    #[error("request timed out")]
    Timeout,

    /// The source exceeded its token bucket.
    #[error("rate limited")]
    RateLimited,

    /// An outbound send was refused by the bandwidth monitor.
    #[error("bandwidth exceeded")]
    BandwidthExceeded,

    /// JSON (de)serialization error, used by address-book persistence.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The peer closed the connection or the socket is no longer connected.
    #[error("stream closed")]
    StreamClosed,

    /// TLS handshake or configuration failure.
    #[error("TLS error: {0}")]
    Tls(String),

    /// Generic protocol violation not covered by a more specific variant.
    #[error("protocol violation: {0}")]
    Protocol(String),
}

/// A specialized `Result` type for the codec/transport/relay layers.
pub type NetworkResult<T> = std::result::Result<T, NetworkError>;

/// Terminal errors surfaced by the block synchronizer.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Discovery found no usable peers to sync against.
    #[error("no peers available")]
    NoPeersAvailable,

    /// The validator rejected a downloaded block.
    #[error("validation failed: {0}")]
    ValidationFailed(String),

    /// A chain-store operation failed; fatal to the current sync run.
    #[error("chain store error: {0}")]
    ChainStoreError(String),

    /// The run was cancelled by the caller. Distinct from `Failed`.
    #[error("sync cancelled")]
    Cancelled,

    /// Any other unrecoverable condition, carrying a human-readable reason.
    #[error("sync failed: {0}")]
    Failed(String),

    /// A lower-layer network error propagated up through the synchronizer.
    #[error(transparent)]
    Network(#[from] NetworkError),
}

/// A specialized `Result` type for the synchronizer.
pub type SyncResult<T> = std::result::Result<T, SyncError>;
