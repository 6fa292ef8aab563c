//! Typed message variants, their field constraints, and the per-variant
//! binary encoding used inside a frame's payload.
//!
//! Every constructor validates its arguments and returns `PayloadOutOfRange`
//! on violation; every variant's serialized payload is cached lazily behind
//! a `OnceLock` so repeated `payload()` calls (e.g. relay enqueue followed by
//! the worker's send) do not re-serialize.

use std::sync::OnceLock;

use crate::error::{NetworkError, NetworkResult};
use crate::protocol::{Endpoint, MessageType, MAX_PAYLOAD_SIZE};

const HASH_LEN: usize = 32;
const MINER_ID_LEN: usize = 33;
const MAX_EXCLUDE_ADDRS: usize = 1000;
const MAX_PEERS_ENTRIES: usize = 1000;
const MAX_HEADERS_ENTRIES: usize = 2000;
const MAX_HEADER_BLOB: usize = 10 * 1024 * 1024;
const MAX_TX_BLOB: usize = 1024 * 1024;
const HEARTBEAT_MAX: usize = 1024;

/// A lazily-computed, clone-cheap cache of a variant's serialized payload.
/// Equality and debug output ignore whether the cache is populated; only
/// the variant's own fields participate in structural comparisons.
#[derive(Default)]
struct PayloadCache(OnceLock<Vec<u8>>);

impl PayloadCache {
    fn get_or_compute(&self, f: impl FnOnce() -> Vec<u8>) -> &[u8] {
        self.0.get_or_init(f).as_slice()
    }
}

impl Clone for PayloadCache {
    fn clone(&self) -> Self {
        Self::default()
    }
}

impl std::fmt::Debug for PayloadCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PayloadCache")
    }
}

impl PartialEq for PayloadCache {
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}

fn write_string(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(&(s.len() as i32).to_le_bytes());
    out.extend_from_slice(s.as_bytes());
}

fn read_string(buf: &[u8], pos: &mut usize) -> NetworkResult<String> {
    let len = read_i32(buf, pos)?;
    if len < 0 {
        return Err(NetworkError::PayloadOutOfRange("negative string length".into()));
    }
    let len = len as usize;
    require(buf, *pos, len)?;
    let s = std::str::from_utf8(&buf[*pos..*pos + len])
        .map_err(|e| NetworkError::PayloadOutOfRange(format!("invalid utf-8: {e}")))?
        .to_string();
    *pos += len;
    Ok(s)
}

fn require(buf: &[u8], pos: usize, len: usize) -> NetworkResult<()> {
    if buf.len() < pos + len {
        return Err(NetworkError::MalformedFrame("payload truncated".into()));
    }
    Ok(())
}

fn read_i32(buf: &[u8], pos: &mut usize) -> NetworkResult<i32> {
    require(buf, *pos, 4)?;
    let v = i32::from_le_bytes(buf[*pos..*pos + 4].try_into().unwrap());
    *pos += 4;
    Ok(v)
}

fn read_u32(buf: &[u8], pos: &mut usize) -> NetworkResult<u32> {
    require(buf, *pos, 4)?;
    let v = u32::from_le_bytes(buf[*pos..*pos + 4].try_into().unwrap());
    *pos += 4;
    Ok(v)
}

fn read_i64(buf: &[u8], pos: &mut usize) -> NetworkResult<i64> {
    require(buf, *pos, 8)?;
    let v = i64::from_le_bytes(buf[*pos..*pos + 8].try_into().unwrap());
    *pos += 8;
    Ok(v)
}

fn read_u16(buf: &[u8], pos: &mut usize) -> NetworkResult<u16> {
    require(buf, *pos, 2)?;
    let v = u16::from_le_bytes(buf[*pos..*pos + 2].try_into().unwrap());
    *pos += 2;
    Ok(v)
}

fn read_u8(buf: &[u8], pos: &mut usize) -> NetworkResult<u8> {
    require(buf, *pos, 1)?;
    let v = buf[*pos];
    *pos += 1;
    Ok(v)
}

fn read_exact<'a>(buf: &'a [u8], pos: &mut usize, len: usize) -> NetworkResult<&'a [u8]> {
    require(buf, *pos, len)?;
    let s = &buf[*pos..*pos + len];
    *pos += len;
    Ok(s)
}

fn ensure_consumed(buf: &[u8], pos: usize) -> NetworkResult<()> {
    if pos != buf.len() {
        return Err(NetworkError::MalformedFrame("trailing bytes in payload".into()));
    }
    Ok(())
}

/// Handshake / HandshakeAck payload.
#[derive(Debug, Clone, PartialEq)]
pub struct HandshakeMessage {
    pub protocol_version: i32,
    pub node_id: String,
    pub user_agent: String,
    pub timestamp: i64,
}

impl HandshakeMessage {
    pub fn new(
        protocol_version: i32,
        node_id: impl Into<String>,
        user_agent: impl Into<String>,
        timestamp: i64,
    ) -> NetworkResult<Self> {
        let node_id = node_id.into();
        let user_agent = user_agent.into();
        if node_id.is_empty() {
            return Err(NetworkError::PayloadOutOfRange("node_id must not be empty".into()));
        }
        if user_agent.is_empty() {
            return Err(NetworkError::PayloadOutOfRange(
                "user_agent must not be empty".into(),
            ));
        }
        Ok(Self {
            protocol_version,
            node_id,
            user_agent,
            timestamp,
        })
    }

    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.protocol_version.to_le_bytes());
        write_string(&mut out, &self.node_id);
        write_string(&mut out, &self.user_agent);
        out.extend_from_slice(&self.timestamp.to_le_bytes());
        out
    }

    fn decode(buf: &[u8]) -> NetworkResult<Self> {
        let mut pos = 0;
        let protocol_version = read_i32(buf, &mut pos)?;
        let node_id = read_string(buf, &mut pos)?;
        let user_agent = read_string(buf, &mut pos)?;
        let timestamp = read_i64(buf, &mut pos)?;
        ensure_consumed(buf, pos)?;
        Self::new(protocol_version, node_id, user_agent, timestamp)
    }
}

/// Shared Ping/Pong payload: fixed 16 bytes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PingPong {
    pub nonce: i64,
    pub timestamp: i64,
}

impl PingPong {
    pub fn new(nonce: i64, timestamp: i64) -> Self {
        Self { nonce, timestamp }
    }

    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16);
        out.extend_from_slice(&self.nonce.to_le_bytes());
        out.extend_from_slice(&self.timestamp.to_le_bytes());
        out
    }

    fn decode(buf: &[u8]) -> NetworkResult<Self> {
        if buf.len() != 16 {
            return Err(NetworkError::PayloadOutOfRange(
                "ping/pong payload must be exactly 16 bytes".into(),
            ));
        }
        let mut pos = 0;
        let nonce = read_i64(buf, &mut pos)?;
        let timestamp = read_i64(buf, &mut pos)?;
        Ok(Self { nonce, timestamp })
    }
}

/// GetPeers request payload.
#[derive(Debug, Clone, PartialEq)]
pub struct GetPeersMessage {
    pub max_count: i32,
    pub exclude_addresses: Vec<String>,
}

impl GetPeersMessage {
    pub fn new(max_count: i32, exclude_addresses: Vec<String>) -> NetworkResult<Self> {
        if !(1..=1000).contains(&max_count) {
            return Err(NetworkError::PayloadOutOfRange(
                "max_count must be in [1, 1000]".into(),
            ));
        }
        if exclude_addresses.len() > MAX_EXCLUDE_ADDRS {
            return Err(NetworkError::PayloadOutOfRange(
                "too many exclude_addresses".into(),
            ));
        }
        Ok(Self {
            max_count,
            exclude_addresses,
        })
    }

    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.max_count.to_le_bytes());
        out.extend_from_slice(&(self.exclude_addresses.len() as i32).to_le_bytes());
        for addr in &self.exclude_addresses {
            write_string(&mut out, addr);
        }
        out
    }

    fn decode(buf: &[u8]) -> NetworkResult<Self> {
        let mut pos = 0;
        let max_count = read_i32(buf, &mut pos)?;
        let count = read_i32(buf, &mut pos)?;
        if count < 0 || count as usize > MAX_EXCLUDE_ADDRS {
            return Err(NetworkError::PayloadOutOfRange("invalid exclude count".into()));
        }
        let mut exclude_addresses = Vec::with_capacity(count as usize);
        for _ in 0..count {
            exclude_addresses.push(read_string(buf, &mut pos)?);
        }
        ensure_consumed(buf, pos)?;
        Self::new(max_count, exclude_addresses)
    }
}

/// One entry in a `Peers` message: a raw address (4 or 16 bytes) and port.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerEntry {
    pub address_bytes: Vec<u8>,
    pub port: u16,
}

impl PeerEntry {
    pub fn new(address_bytes: Vec<u8>, port: u16) -> NetworkResult<Self> {
        if address_bytes.len() != 4 && address_bytes.len() != 16 {
            return Err(NetworkError::PayloadOutOfRange(
                "address must be exactly 4 or 16 bytes".into(),
            ));
        }
        Ok(Self { address_bytes, port })
    }

    pub fn from_endpoint(ep: &Endpoint) -> Self {
        let address_bytes = match ep.ip {
            std::net::IpAddr::V4(v4) => v4.octets().to_vec(),
            std::net::IpAddr::V6(v6) => v6.octets().to_vec(),
        };
        Self {
            address_bytes,
            port: ep.port,
        }
    }

    pub fn to_endpoint(&self) -> NetworkResult<Endpoint> {
        let ip = match self.address_bytes.len() {
            4 => std::net::IpAddr::V4(std::net::Ipv4Addr::new(
                self.address_bytes[0],
                self.address_bytes[1],
                self.address_bytes[2],
                self.address_bytes[3],
            )),
            16 => {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&self.address_bytes);
                std::net::IpAddr::V6(std::net::Ipv6Addr::from(octets))
            }
            _ => {
                return Err(NetworkError::PayloadOutOfRange(
                    "address must be exactly 4 or 16 bytes".into(),
                ))
            }
        };
        Ok(Endpoint::new(ip, self.port))
    }
}

/// Peers response payload: an ordered list of endpoints.
#[derive(Debug, Clone, PartialEq)]
pub struct PeersMessage {
    pub entries: Vec<PeerEntry>,
}

impl PeersMessage {
    pub fn new(entries: Vec<PeerEntry>) -> NetworkResult<Self> {
        if entries.len() > MAX_PEERS_ENTRIES {
            return Err(NetworkError::PayloadOutOfRange("too many peer entries".into()));
        }
        Ok(Self { entries })
    }

    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&(self.entries.len() as i32).to_le_bytes());
        for e in &self.entries {
            out.push(e.address_bytes.len() as u8);
            out.extend_from_slice(&e.address_bytes);
            out.extend_from_slice(&e.port.to_le_bytes());
        }
        out
    }

    fn decode(buf: &[u8]) -> NetworkResult<Self> {
        let mut pos = 0;
        let count = read_i32(buf, &mut pos)?;
        if count < 0 || count as usize > MAX_PEERS_ENTRIES {
            return Err(NetworkError::PayloadOutOfRange("invalid peers count".into()));
        }
        let mut entries = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let len = read_u8(buf, &mut pos)? as usize;
            if len != 4 && len != 16 {
                return Err(NetworkError::PayloadOutOfRange(
                    "address must be exactly 4 or 16 bytes".into(),
                ));
            }
            let address_bytes = read_exact(buf, &mut pos, len)?.to_vec();
            let port = read_u16(buf, &mut pos)?;
            entries.push(PeerEntry::new(address_bytes, port)?);
        }
        ensure_consumed(buf, pos)?;
        Self::new(entries)
    }
}

/// GetHeaders request payload.
#[derive(Debug, Clone, PartialEq)]
pub struct GetHeadersMessage {
    pub locator_hash: [u8; HASH_LEN],
    pub stop_hash: Option<[u8; HASH_LEN]>,
    pub max_headers: i32,
}

impl GetHeadersMessage {
    pub fn new(
        locator_hash: [u8; HASH_LEN],
        stop_hash: Option<[u8; HASH_LEN]>,
        max_headers: i32,
    ) -> NetworkResult<Self> {
        if max_headers <= 0 {
            return Err(NetworkError::PayloadOutOfRange("max_headers must be > 0".into()));
        }
        Ok(Self {
            locator_hash,
            stop_hash,
            max_headers,
        })
    }

    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.locator_hash);
        match self.stop_hash {
            Some(h) => {
                out.push(1);
                out.extend_from_slice(&h);
            }
            None => out.push(0),
        }
        out.extend_from_slice(&self.max_headers.to_le_bytes());
        out
    }

    fn decode(buf: &[u8]) -> NetworkResult<Self> {
        let mut pos = 0;
        let locator_hash: [u8; HASH_LEN] = read_exact(buf, &mut pos, HASH_LEN)?.try_into().unwrap();
        let has_stop = read_u8(buf, &mut pos)?;
        let stop_hash = match has_stop {
            0 => None,
            1 => Some(read_exact(buf, &mut pos, HASH_LEN)?.try_into().unwrap()),
            _ => {
                return Err(NetworkError::PayloadOutOfRange(
                    "stop_hash flag must be 0 or 1".into(),
                ))
            }
        };
        let max_headers = read_i32(buf, &mut pos)?;
        ensure_consumed(buf, pos)?;
        Self::new(locator_hash, stop_hash, max_headers)
    }
}

/// Headers response payload: ordered serialized-header blobs.
#[derive(Debug, Clone, PartialEq)]
pub struct HeadersMessage {
    pub headers: Vec<Vec<u8>>,
}

impl HeadersMessage {
    pub fn new(headers: Vec<Vec<u8>>) -> NetworkResult<Self> {
        if headers.len() > MAX_HEADERS_ENTRIES {
            return Err(NetworkError::PayloadOutOfRange("too many headers".into()));
        }
        for h in &headers {
            if h.is_empty() || h.len() > MAX_HEADER_BLOB {
                return Err(NetworkError::PayloadOutOfRange("header blob out of range".into()));
            }
        }
        Ok(Self { headers })
    }

    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&(self.headers.len() as i32).to_le_bytes());
        for h in &self.headers {
            out.extend_from_slice(&(h.len() as u32).to_le_bytes());
            out.extend_from_slice(h);
        }
        out
    }

    fn decode(buf: &[u8]) -> NetworkResult<Self> {
        let mut pos = 0;
        let count = read_i32(buf, &mut pos)?;
        if count < 0 || count as usize > MAX_HEADERS_ENTRIES {
            return Err(NetworkError::PayloadOutOfRange("invalid headers count".into()));
        }
        let mut headers = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let len = read_u32(buf, &mut pos)? as usize;
            if len == 0 || len > MAX_HEADER_BLOB {
                return Err(NetworkError::PayloadOutOfRange("header blob out of range".into()));
            }
            headers.push(read_exact(buf, &mut pos, len)?.to_vec());
        }
        ensure_consumed(buf, pos)?;
        Self::new(headers)
    }
}

/// GetBlock request payload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GetBlockMessage {
    pub block_hash: [u8; HASH_LEN],
}

impl GetBlockMessage {
    pub fn new(block_hash: [u8; HASH_LEN]) -> Self {
        Self { block_hash }
    }

    fn encode(&self) -> Vec<u8> {
        self.block_hash.to_vec()
    }

    fn decode(buf: &[u8]) -> NetworkResult<Self> {
        if buf.len() != HASH_LEN {
            return Err(NetworkError::PayloadOutOfRange(
                "block hash must be exactly 32 bytes".into(),
            ));
        }
        let mut hash = [0u8; HASH_LEN];
        hash.copy_from_slice(buf);
        Ok(Self::new(hash))
    }
}

/// Opaque block blob, carried by both `Block` and `NewBlock`.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockBlob {
    pub data: Vec<u8>,
}

impl BlockBlob {
    pub fn new(data: Vec<u8>) -> NetworkResult<Self> {
        if data.is_empty() || data.len() > MAX_PAYLOAD_SIZE {
            return Err(NetworkError::PayloadOutOfRange("block blob out of range".into()));
        }
        Ok(Self { data })
    }

    fn encode(&self) -> Vec<u8> {
        self.data.clone()
    }

    fn decode(buf: &[u8]) -> NetworkResult<Self> {
        Self::new(buf.to_vec())
    }
}

/// Opaque transaction blob.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionBlob {
    pub data: Vec<u8>,
}

impl TransactionBlob {
    pub fn new(data: Vec<u8>) -> NetworkResult<Self> {
        if data.is_empty() || data.len() > MAX_TX_BLOB {
            return Err(NetworkError::PayloadOutOfRange(
                "transaction blob out of range".into(),
            ));
        }
        Ok(Self { data })
    }

    fn encode(&self) -> Vec<u8> {
        self.data.clone()
    }

    fn decode(buf: &[u8]) -> NetworkResult<Self> {
        Self::new(buf.to_vec())
    }
}

/// ProofSubmission payload.
#[derive(Debug, Clone, PartialEq)]
pub struct ProofSubmissionMessage {
    pub block_height: i64,
    pub miner_id: [u8; MINER_ID_LEN],
    pub proof_data: Vec<u8>,
}

impl ProofSubmissionMessage {
    pub fn new(
        block_height: i64,
        miner_id: [u8; MINER_ID_LEN],
        proof_data: Vec<u8>,
    ) -> NetworkResult<Self> {
        if block_height < 0 {
            return Err(NetworkError::PayloadOutOfRange("block_height must be >= 0".into()));
        }
        if proof_data.is_empty() || proof_data.len() > MAX_TX_BLOB {
            return Err(NetworkError::PayloadOutOfRange("proof_data out of range".into()));
        }
        Ok(Self {
            block_height,
            miner_id,
            proof_data,
        })
    }

    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.block_height.to_le_bytes());
        out.extend_from_slice(&self.miner_id);
        out.extend_from_slice(&self.proof_data);
        out
    }

    fn decode(buf: &[u8]) -> NetworkResult<Self> {
        let mut pos = 0;
        let block_height = read_i64(buf, &mut pos)?;
        let miner_id: [u8; MINER_ID_LEN] = read_exact(buf, &mut pos, MINER_ID_LEN)?.try_into().unwrap();
        let proof_data = buf[pos..].to_vec();
        Self::new(block_height, miner_id, proof_data)
    }
}

/// BlockAccepted payload: fixed 40 bytes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockAcceptedMessage {
    pub block_hash: [u8; HASH_LEN],
    pub block_height: i64,
}

impl BlockAcceptedMessage {
    pub fn new(block_hash: [u8; HASH_LEN], block_height: i64) -> NetworkResult<Self> {
        if block_height < 0 {
            return Err(NetworkError::PayloadOutOfRange("block_height must be >= 0".into()));
        }
        Ok(Self {
            block_hash,
            block_height,
        })
    }

    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(40);
        out.extend_from_slice(&self.block_hash);
        out.extend_from_slice(&self.block_height.to_le_bytes());
        out
    }

    fn decode(buf: &[u8]) -> NetworkResult<Self> {
        if buf.len() != 40 {
            return Err(NetworkError::PayloadOutOfRange(
                "block_accepted payload must be exactly 40 bytes".into(),
            ));
        }
        let mut pos = 0;
        let block_hash: [u8; HASH_LEN] = read_exact(buf, &mut pos, HASH_LEN)?.try_into().unwrap();
        let block_height = read_i64(buf, &mut pos)?;
        Self::new(block_hash, block_height)
    }
}

/// TxPoolRequest payload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TxPoolRequestMessage {
    pub max_transactions: i32,
    pub include_transaction_data: bool,
}

impl TxPoolRequestMessage {
    pub fn new(max_transactions: i32, include_transaction_data: bool) -> NetworkResult<Self> {
        if max_transactions <= 0 {
            return Err(NetworkError::PayloadOutOfRange(
                "max_transactions must be > 0".into(),
            ));
        }
        Ok(Self {
            max_transactions,
            include_transaction_data,
        })
    }

    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(5);
        out.extend_from_slice(&self.max_transactions.to_le_bytes());
        out.push(self.include_transaction_data as u8);
        out
    }

    fn decode(buf: &[u8]) -> NetworkResult<Self> {
        let mut pos = 0;
        let max_transactions = read_i32(buf, &mut pos)?;
        let include_transaction_data = read_u8(buf, &mut pos)? != 0;
        ensure_consumed(buf, pos)?;
        Self::new(max_transactions, include_transaction_data)
    }
}

/// Error message payload (type tag `0xFF`).
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorMessage {
    pub code: i32,
    pub reason: String,
}

impl ErrorMessage {
    pub fn new(code: i32, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.code.to_le_bytes());
        write_string(&mut out, &self.reason);
        out
    }

    fn decode(buf: &[u8]) -> NetworkResult<Self> {
        let mut pos = 0;
        let code = read_i32(buf, &mut pos)?;
        let reason = read_string(buf, &mut pos)?;
        ensure_consumed(buf, pos)?;
        Ok(Self::new(code, reason))
    }
}

/// A fully typed protocol message, tagged with its `MessageType` and
/// carrying a lazily-computed, cached serialized payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Handshake(HandshakeMessage, PayloadCache),
    HandshakeAck,
    Heartbeat,
    Ping(PingPong, PayloadCache),
    Pong(PingPong, PayloadCache),
    GetPeers(GetPeersMessage, PayloadCache),
    Peers(PeersMessage, PayloadCache),
    GetHeaders(GetHeadersMessage, PayloadCache),
    Headers(HeadersMessage, PayloadCache),
    GetBlock(GetBlockMessage, PayloadCache),
    Block(BlockBlob, PayloadCache),
    Transaction(TransactionBlob, PayloadCache),
    NewBlock(BlockBlob, PayloadCache),
    TxPoolRequest(TxPoolRequestMessage, PayloadCache),
    ProofSubmission(ProofSubmissionMessage, PayloadCache),
    BlockAccepted(BlockAcceptedMessage, PayloadCache),
    Error(ErrorMessage, PayloadCache),
}

impl Message {
    pub fn handshake(msg: HandshakeMessage) -> Self {
        Message::Handshake(msg, PayloadCache::default())
    }
    pub fn handshake_ack() -> Self {
        Message::HandshakeAck
    }
    pub fn heartbeat() -> Self {
        Message::Heartbeat
    }
    pub fn ping(msg: PingPong) -> Self {
        Message::Ping(msg, PayloadCache::default())
    }
    pub fn pong(msg: PingPong) -> Self {
        Message::Pong(msg, PayloadCache::default())
    }
    pub fn get_peers(msg: GetPeersMessage) -> Self {
        Message::GetPeers(msg, PayloadCache::default())
    }
    pub fn peers(msg: PeersMessage) -> Self {
        Message::Peers(msg, PayloadCache::default())
    }
    pub fn get_headers(msg: GetHeadersMessage) -> Self {
        Message::GetHeaders(msg, PayloadCache::default())
    }
    pub fn headers(msg: HeadersMessage) -> Self {
        Message::Headers(msg, PayloadCache::default())
    }
    pub fn get_block(msg: GetBlockMessage) -> Self {
        Message::GetBlock(msg, PayloadCache::default())
    }
    pub fn block(msg: BlockBlob) -> Self {
        Message::Block(msg, PayloadCache::default())
    }
    pub fn transaction(msg: TransactionBlob) -> Self {
        Message::Transaction(msg, PayloadCache::default())
    }
    pub fn new_block(msg: BlockBlob) -> Self {
        Message::NewBlock(msg, PayloadCache::default())
    }
    pub fn tx_pool_request(msg: TxPoolRequestMessage) -> Self {
        Message::TxPoolRequest(msg, PayloadCache::default())
    }
    pub fn proof_submission(msg: ProofSubmissionMessage) -> Self {
        Message::ProofSubmission(msg, PayloadCache::default())
    }
    pub fn block_accepted(msg: BlockAcceptedMessage) -> Self {
        Message::BlockAccepted(msg, PayloadCache::default())
    }
    pub fn error(msg: ErrorMessage) -> Self {
        Message::Error(msg, PayloadCache::default())
    }

    /// The wire type tag for this variant.
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Handshake(..) => MessageType::Handshake,
            Message::HandshakeAck => MessageType::HandshakeAck,
            Message::Heartbeat => MessageType::Heartbeat,
            Message::Ping(..) => MessageType::Ping,
            Message::Pong(..) => MessageType::Pong,
            Message::GetPeers(..) => MessageType::GetPeers,
            Message::Peers(..) => MessageType::Peers,
            Message::GetHeaders(..) => MessageType::GetHeaders,
            Message::Headers(..) => MessageType::Headers,
            Message::GetBlock(..) => MessageType::GetBlock,
            Message::Block(..) => MessageType::Block,
            Message::Transaction(..) => MessageType::Transaction,
            Message::NewBlock(..) => MessageType::NewBlock,
            Message::TxPoolRequest(..) => MessageType::TxPoolRequest,
            Message::ProofSubmission(..) => MessageType::ProofSubmission,
            Message::BlockAccepted(..) => MessageType::BlockAccepted,
            Message::Error(..) => MessageType::Error,
        }
    }

    /// The serialized payload bytes, computed once and cached thereafter.
    pub fn payload(&self) -> &[u8] {
        match self {
            Message::Handshake(m, c) => c.get_or_compute(|| m.encode()),
            Message::HandshakeAck => &[],
            Message::Heartbeat => &[],
            Message::Ping(m, c) => c.get_or_compute(|| m.encode()),
            Message::Pong(m, c) => c.get_or_compute(|| m.encode()),
            Message::GetPeers(m, c) => c.get_or_compute(|| m.encode()),
            Message::Peers(m, c) => c.get_or_compute(|| m.encode()),
            Message::GetHeaders(m, c) => c.get_or_compute(|| m.encode()),
            Message::Headers(m, c) => c.get_or_compute(|| m.encode()),
            Message::GetBlock(m, c) => c.get_or_compute(|| m.encode()),
            Message::Block(m, c) => c.get_or_compute(|| m.encode()),
            Message::Transaction(m, c) => c.get_or_compute(|| m.encode()),
            Message::NewBlock(m, c) => c.get_or_compute(|| m.encode()),
            Message::TxPoolRequest(m, c) => c.get_or_compute(|| m.encode()),
            Message::ProofSubmission(m, c) => c.get_or_compute(|| m.encode()),
            Message::BlockAccepted(m, c) => c.get_or_compute(|| m.encode()),
            Message::Error(m, c) => c.get_or_compute(|| m.encode()),
        }
    }

    /// Deserialize a message from its type tag and payload bytes.
    pub fn deserialize(ty: MessageType, payload: &[u8]) -> NetworkResult<Self> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(NetworkError::PayloadOutOfRange("payload exceeds 16 MiB".into()));
        }
        Ok(match ty {
            MessageType::Handshake => Message::handshake(HandshakeMessage::decode(payload)?),
            MessageType::HandshakeAck => {
                if !payload.is_empty() {
                    return Err(NetworkError::PayloadOutOfRange(
                        "handshake_ack payload must be empty".into(),
                    ));
                }
                Message::HandshakeAck
            }
            MessageType::Heartbeat => {
                if payload.len() > HEARTBEAT_MAX {
                    return Err(NetworkError::PayloadOutOfRange(
                        "heartbeat payload exceeds 1024 bytes".into(),
                    ));
                }
                Message::Heartbeat
            }
            MessageType::Ping => Message::ping(PingPong::decode(payload)?),
            MessageType::Pong => Message::pong(PingPong::decode(payload)?),
            MessageType::GetPeers => Message::get_peers(GetPeersMessage::decode(payload)?),
            MessageType::Peers => Message::peers(PeersMessage::decode(payload)?),
            MessageType::GetHeaders => Message::get_headers(GetHeadersMessage::decode(payload)?),
            MessageType::Headers => Message::headers(HeadersMessage::decode(payload)?),
            MessageType::GetBlock => Message::get_block(GetBlockMessage::decode(payload)?),
            MessageType::Block => Message::block(BlockBlob::decode(payload)?),
            MessageType::Transaction => Message::transaction(TransactionBlob::decode(payload)?),
            MessageType::NewBlock => Message::new_block(BlockBlob::decode(payload)?),
            MessageType::TxPoolRequest => {
                Message::tx_pool_request(TxPoolRequestMessage::decode(payload)?)
            }
            MessageType::ProofSubmission => {
                Message::proof_submission(ProofSubmissionMessage::decode(payload)?)
            }
            MessageType::BlockAccepted => {
                Message::block_accepted(BlockAcceptedMessage::decode(payload)?)
            }
            MessageType::Error => Message::error(ErrorMessage::decode(payload)?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_round_trips_to_s1_bytes() {
        let msg = Message::ping(PingPong::new(0x0102030405060708, 0));
        let frame = crate::protocol::encode_frame(&msg);
        assert_eq!(
            frame,
            vec![
                0x11, 0x00, 0x00, 0x00, 0x04, 0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01,
                0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            ]
        );
        let (decoded, consumed) = crate::protocol::decode_frame(&frame).unwrap().unwrap();
        assert_eq!(consumed, frame.len());
        assert_eq!(decoded, msg);
    }

    #[test]
    fn handshake_rejects_empty_node_id() {
        assert!(HandshakeMessage::new(1, "", "agent/1.0", 0).is_err());
        assert!(HandshakeMessage::new(1, "node-1", "", 0).is_err());
        assert!(HandshakeMessage::new(1, "node-1", "agent/1.0", 0).is_ok());
    }

    #[test]
    fn get_peers_rejects_out_of_range_max_count() {
        assert!(GetPeersMessage::new(0, vec![]).is_err());
        assert!(GetPeersMessage::new(1001, vec![]).is_err());
        assert!(GetPeersMessage::new(1000, vec![]).is_ok());
    }

    #[test]
    fn peer_entry_rejects_odd_address_length() {
        assert!(PeerEntry::new(vec![1, 2, 3], 8333).is_err());
        assert!(PeerEntry::new(vec![1, 2, 3, 4], 8333).is_ok());
        assert!(PeerEntry::new(vec![0; 16], 8333).is_ok());
    }

    #[test]
    fn block_blob_rejects_empty_and_oversized() {
        assert!(BlockBlob::new(vec![]).is_err());
        assert!(BlockBlob::new(vec![0u8; MAX_PAYLOAD_SIZE + 1]).is_err());
        assert!(BlockBlob::new(vec![1, 2, 3]).is_ok());
    }

    #[test]
    fn every_constructed_message_round_trips() {
        let msgs = vec![
            Message::handshake(HandshakeMessage::new(1, "n1", "ua/1.0", 42).unwrap()),
            Message::handshake_ack(),
            Message::heartbeat(),
            Message::ping(PingPong::new(1, 2)),
            Message::pong(PingPong::new(3, 4)),
            Message::get_peers(GetPeersMessage::new(10, vec!["1.2.3.4:8333".into()]).unwrap()),
            Message::peers(
                PeersMessage::new(vec![PeerEntry::new(vec![1, 2, 3, 4], 8333).unwrap()]).unwrap(),
            ),
            Message::get_headers(GetHeadersMessage::new([1u8; 32], None, 2000).unwrap()),
            Message::headers(HeadersMessage::new(vec![vec![1, 2, 3]]).unwrap()),
            Message::get_block(GetBlockMessage::new([2u8; 32])),
            Message::block(BlockBlob::new(vec![9; 10]).unwrap()),
            Message::transaction(TransactionBlob::new(vec![1; 5]).unwrap()),
            Message::new_block(BlockBlob::new(vec![8; 10]).unwrap()),
            Message::tx_pool_request(TxPoolRequestMessage::new(5, true).unwrap()),
            Message::proof_submission(
                ProofSubmissionMessage::new(7, [3u8; 33], vec![1, 2]).unwrap(),
            ),
            Message::block_accepted(BlockAcceptedMessage::new([4u8; 32], 7).unwrap()),
            Message::error(ErrorMessage::new(1, "bad")),
        ];
        for msg in msgs {
            let frame = crate::protocol::encode_frame(&msg);
            let (decoded, consumed) = crate::protocol::decode_frame(&frame).unwrap().unwrap();
            assert_eq!(consumed, frame.len());
            assert_eq!(decoded, msg);
        }
    }
}
