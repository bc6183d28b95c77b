//! # Packet
//!
//! The fixed binary envelope every protocol message travels in.
//!
//! A packet is `flags(1) | id(4, big-endian) | payload(N)`. The flags byte
//! packs two fields: bits 0-6 carry the action code and bit 7 carries the
//! impulse flag (1 = request or push, 0 = response). The payload is opaque
//! at this layer; higher layers decode it per action.
//!
//! Framing of the variable-length payload is not handled here - see
//! [`crate::core::codec`] for the length-delimited codec used over byte
//! streams.

use crate::error::{NetronError, Result};
use bytes::{BufMut, Bytes, BytesMut};

/// Size of the fixed envelope header: 1 flags byte + 4 id bytes
pub const HEADER_SIZE: usize = 5;

const IMPULSE_BIT: u8 = 0b1000_0000;
const ACTION_MASK: u8 = 0b0111_1111;

/// The closed set of protocol actions. Codes above `StreamEnd` fit the
/// 7-bit field but are reserved; dispatch rejects them with `NotSupported`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Action {
    Get = 0,
    Set = 1,
    Ping = 2,
    EventOn = 3,
    EventOff = 4,
    EventEmit = 5,
    ContextAttach = 6,
    ContextDetach = 7,
    StreamRequest = 8,
    StreamAccept = 9,
    StreamData = 10,
    StreamPause = 11,
    StreamResume = 12,
    StreamEnd = 13,
}

impl Action {
    /// Map a 7-bit wire code to an action, `None` for reserved codes
    pub fn from_code(code: u8) -> Option<Action> {
        match code {
            0 => Some(Action::Get),
            1 => Some(Action::Set),
            2 => Some(Action::Ping),
            3 => Some(Action::EventOn),
            4 => Some(Action::EventOff),
            5 => Some(Action::EventEmit),
            6 => Some(Action::ContextAttach),
            7 => Some(Action::ContextDetach),
            8 => Some(Action::StreamRequest),
            9 => Some(Action::StreamAccept),
            10 => Some(Action::StreamData),
            11 => Some(Action::StreamPause),
            12 => Some(Action::StreamResume),
            13 => Some(Action::StreamEnd),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    /// Stream actions carry a stream id in the `id` field and are routed to
    /// the multiplexer regardless of the impulse bit.
    pub fn is_stream(self) -> bool {
        matches!(
            self,
            Action::StreamRequest
                | Action::StreamAccept
                | Action::StreamData
                | Action::StreamPause
                | Action::StreamResume
                | Action::StreamEnd
        )
    }
}

/// A fully decoded protocol packet
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    /// Raw 7-bit action code. Kept raw so reserved codes survive decoding
    /// and can be answered with `NotSupported` instead of dropping the frame.
    pub action: u8,
    /// Request/push (true) or response (false)
    pub impulse: bool,
    /// Correlation id (request/response) or stream id (stream actions)
    pub id: u32,
    pub payload: Bytes,
}

impl Packet {
    /// Build an impulse packet (request or push)
    pub fn request(action: Action, id: u32, payload: Bytes) -> Self {
        Self {
            action: action.code(),
            impulse: true,
            id,
            payload,
        }
    }

    /// Build a response packet correlated to a request id
    pub fn response(action: Action, id: u32, payload: Bytes) -> Self {
        Self {
            action: action.code(),
            impulse: false,
            id,
            payload,
        }
    }

    /// Build a response echoing a raw (possibly reserved) action code
    pub fn raw_response(action: u8, id: u32, payload: Bytes) -> Self {
        Self {
            action: action & ACTION_MASK,
            impulse: false,
            id,
            payload,
        }
    }

    pub fn flags(&self) -> u8 {
        let mut flags = self.action & ACTION_MASK;
        if self.impulse {
            flags |= IMPULSE_BIT;
        }
        flags
    }

    /// Serialize the envelope (header + payload) to a byte buffer
    pub fn to_bytes(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(HEADER_SIZE + self.payload.len());
        out.put_u8(self.flags());
        out.put_u32(self.id);
        out.put_slice(&self.payload);
        out.freeze()
    }

    /// Parse an envelope from a raw buffer (header + payload)
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(NetronError::MalformedPacket);
        }

        let flags = buf[0];
        let id = u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]);

        Ok(Packet {
            action: flags & ACTION_MASK,
            impulse: flags & IMPULSE_BIT != 0,
            id,
            payload: Bytes::copy_from_slice(&buf[HEADER_SIZE..]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_round_trip_full_grid() {
        // Every 7-bit action code with both impulse values must survive
        // encode -> decode bit-exactly.
        for code in 0u8..=127 {
            for impulse in [false, true] {
                let packet = Packet {
                    action: code,
                    impulse,
                    id: 0xDEAD_BEEF,
                    payload: Bytes::from_static(b"xyz"),
                };
                let decoded = Packet::from_bytes(&packet.to_bytes()).unwrap();
                assert_eq!(decoded.action, code);
                assert_eq!(decoded.impulse, impulse);
                assert_eq!(decoded.id, 0xDEAD_BEEF);
                assert_eq!(&decoded.payload[..], b"xyz");
            }
        }
    }

    #[test]
    fn short_buffer_is_malformed() {
        let err = Packet::from_bytes(&[0x01, 0x02]).unwrap_err();
        assert!(matches!(err, NetronError::MalformedPacket));
    }

    #[test]
    fn empty_payload_round_trip() {
        let packet = Packet::request(Action::Ping, 7, Bytes::new());
        let decoded = Packet::from_bytes(&packet.to_bytes()).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn action_table_is_closed() {
        for code in 0u8..=13 {
            assert!(Action::from_code(code).is_some());
        }
        for code in 14u8..=127 {
            assert!(Action::from_code(code).is_none());
        }
    }
}
