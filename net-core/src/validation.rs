//! Pure structural validation of a message's cached payload (spec §4.2).

use crate::protocol::{Message, MessageType, MAX_PAYLOAD_SIZE};

const HEARTBEAT_MAX: usize = 1024;

/// Re-validate a message's payload against its own variant deserializer.
///
/// This never allocates beyond what the variant's own deserializer needs:
/// for an already-constructed `Message` the payload is re-parsed from the
/// cached bytes, which is itself an upper bound on the cost of having
/// constructed the message in the first place.
pub fn validate(message: &Message) -> bool {
    let payload = message.payload();
    if payload.len() > MAX_PAYLOAD_SIZE {
        return false;
    }
    if message.message_type() == MessageType::Heartbeat && payload.len() > HEARTBEAT_MAX {
        return false;
    }
    Message::deserialize(message.message_type(), payload).is_ok()
}

/// Validate a raw `(type, payload)` pair as read off the wire, without an
/// already-constructed `Message`.
pub fn validate_raw(ty_byte: u8, payload: &[u8]) -> bool {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return false;
    }
    let Some(ty) = MessageType::from_byte(ty_byte) else {
        return false;
    };
    if ty == MessageType::Heartbeat && payload.len() > HEARTBEAT_MAX {
        return false;
    }
    Message::deserialize(ty, payload).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::message::{BlockBlob, PingPong};

    #[test]
    fn valid_message_passes() {
        let msg = Message::ping(PingPong::new(1, 2));
        assert!(validate(&msg));
    }

    #[test]
    fn unknown_type_byte_is_invalid() {
        assert!(!validate_raw(0x7F, &[]));
    }

    #[test]
    fn oversized_heartbeat_is_invalid() {
        assert!(!validate_raw(MessageType::Heartbeat.as_byte(), &vec![0u8; 2000]));
    }

    #[test]
    fn block_within_bounds_is_valid() {
        let msg = Message::block(BlockBlob::new(vec![1, 2, 3]).unwrap());
        assert!(validate(&msg));
    }
}
