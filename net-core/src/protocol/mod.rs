//! Wire protocol: message type tags, addressing, and framing.

pub mod codec;
pub mod message;

use std::net::{IpAddr, SocketAddr};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

pub use codec::{decode_frame, encode_frame};
pub use message::Message;

/// Maximum payload size for any message (16 MiB), per spec.
pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

/// Single-byte message type tag. Numeric assignments are stable on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    Handshake = 0x01,
    HandshakeAck = 0x02,
    Heartbeat = 0x03,
    Ping = 0x04,
    Pong = 0x05,
    GetPeers = 0x10,
    Peers = 0x11,
    GetHeaders = 0x20,
    Headers = 0x21,
    GetBlock = 0x22,
    Block = 0x23,
    Transaction = 0x30,
    NewBlock = 0x31,
    TxPoolRequest = 0x32,
    ProofSubmission = 0x40,
    BlockAccepted = 0x41,
    Error = 0xFF,
}

impl MessageType {
    /// Decode a type byte, or `None` if it matches no variant.
    pub fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            0x01 => Self::Handshake,
            0x02 => Self::HandshakeAck,
            0x03 => Self::Heartbeat,
            0x04 => Self::Ping,
            0x05 => Self::Pong,
            0x10 => Self::GetPeers,
            0x11 => Self::Peers,
            0x20 => Self::GetHeaders,
            0x21 => Self::Headers,
            0x22 => Self::GetBlock,
            0x23 => Self::Block,
            0x30 => Self::Transaction,
            0x31 => Self::NewBlock,
            0x32 => Self::TxPoolRequest,
            0x40 => Self::ProofSubmission,
            0x41 => Self::BlockAccepted,
            0xFF => Self::Error,
            _ => return None,
        })
    }

    /// The byte this variant is encoded as on the wire.
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

/// Relay priority, derived from a message's type. Higher numeric value is
/// dequeued first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Low = 0,
    Normal = 1,
    High = 2,
    Critical = 3,
}

impl Priority {
    /// The four priority levels in ascending order, for iterating channels.
    pub const ALL: [Priority; 4] = [
        Priority::Low,
        Priority::Normal,
        Priority::High,
        Priority::Critical,
    ];

    /// Index into a 4-element channel array.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Map a message type to its relay priority (spec §4.11).
    pub fn for_message_type(ty: MessageType) -> Self {
        match ty {
            MessageType::Ping | MessageType::Pong | MessageType::Heartbeat => Priority::Critical,
            MessageType::Block | MessageType::NewBlock | MessageType::BlockAccepted => {
                Priority::High
            }
            MessageType::ProofSubmission
            | MessageType::GetHeaders
            | MessageType::Headers
            | MessageType::GetBlock => Priority::Normal,
            MessageType::Transaction => Priority::Low,
            _ => Priority::Normal,
        }
    }
}

/// A network endpoint, the canonical "ip:port" identity used as the key for
/// peer and address-book maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub ip: IpAddr,
    pub port: u16,
}

impl Endpoint {
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self { ip, port }
    }

    /// True unless the address is private/loopback/link-local (spec §3 (a)).
    pub fn is_routable(&self) -> bool {
        match self.ip {
            IpAddr::V4(v4) => {
                !(v4.is_private()
                    || v4.is_loopback()
                    || v4.is_link_local()
                    || v4.is_unspecified()
                    || v4.is_broadcast())
            }
            IpAddr::V6(v6) => !(v6.is_loopback() || v6.is_unspecified() || is_unique_local(&v6)),
        }
    }

    /// Subnet key used for the diversity invariant: IPv4 /24, IPv6 /48.
    pub fn subnet_key(&self) -> String {
        match self.ip {
            IpAddr::V4(v4) => {
                let o = v4.octets();
                format!("{}.{}.{}.0/24", o[0], o[1], o[2])
            }
            IpAddr::V6(v6) => {
                let s = v6.segments();
                format!("{:x}:{:x}:{:x}::/48", s[0], s[1], s[2])
            }
        }
    }
}

/// `fe80::`/10 and `fc00::`/7 are not exposed as stable methods on stable
/// `Ipv6Addr` at this MSRV; approximate unique-local/link-local via the
/// leading segment, matching how the teacher's IPv4 classification in
/// `rusty-p2p::peer_selection` inspects octets directly.
fn is_unique_local(v6: &std::net::Ipv6Addr) -> bool {
    let first = v6.segments()[0];
    (0xfc00..=0xfdff).contains(&first) || (first & 0xffc0) == 0xfe80
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", SocketAddr::new(self.ip, self.port))
    }
}

impl std::str::FromStr for Endpoint {
    type Err = std::net::AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let addr: SocketAddr = s.parse()?;
        Ok(Self::new(addr.ip(), addr.port()))
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip(), addr.port())
    }
}

impl From<Endpoint> for SocketAddr {
    fn from(ep: Endpoint) -> Self {
        SocketAddr::new(ep.ip, ep.port)
    }
}

/// Current Unix timestamp in seconds.
pub fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_type_round_trips_every_byte() {
        let all = [
            MessageType::Handshake,
            MessageType::HandshakeAck,
            MessageType::Heartbeat,
            MessageType::Ping,
            MessageType::Pong,
            MessageType::GetPeers,
            MessageType::Peers,
            MessageType::GetHeaders,
            MessageType::Headers,
            MessageType::GetBlock,
            MessageType::Block,
            MessageType::Transaction,
            MessageType::NewBlock,
            MessageType::TxPoolRequest,
            MessageType::ProofSubmission,
            MessageType::BlockAccepted,
            MessageType::Error,
        ];
        for ty in all {
            assert_eq!(MessageType::from_byte(ty.as_byte()), Some(ty));
        }
        assert_eq!(MessageType::from_byte(0x7F), None);
    }

    #[test]
    fn priority_mapping_matches_spec() {
        assert_eq!(Priority::for_message_type(MessageType::Ping), Priority::Critical);
        assert_eq!(Priority::for_message_type(MessageType::Block), Priority::High);
        assert_eq!(
            Priority::for_message_type(MessageType::GetHeaders),
            Priority::Normal
        );
        assert_eq!(
            Priority::for_message_type(MessageType::Transaction),
            Priority::Low
        );
        assert_eq!(
            Priority::for_message_type(MessageType::HandshakeAck),
            Priority::Normal
        );
    }

    #[test]
    fn endpoint_subnet_key_groups_by_slash_24() {
        let a: Endpoint = "10.0.0.1:8333".parse().unwrap();
        let b: Endpoint = "10.0.0.2:8333".parse().unwrap();
        let c: Endpoint = "10.0.1.2:8333".parse().unwrap();
        assert_eq!(a.subnet_key(), b.subnet_key());
        assert_ne!(a.subnet_key(), c.subnet_key());
    }

    #[test]
    fn private_addresses_are_not_routable() {
        let ep: Endpoint = "192.168.1.1:8333".parse().unwrap();
        assert!(!ep.is_routable());
        let ep: Endpoint = "8.8.8.8:8333".parse().unwrap();
        assert!(ep.is_routable());
    }
}
