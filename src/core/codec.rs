//! # Codec
//!
//! Length-delimited framing of [`Packet`] envelopes over a byte stream.
//!
//! `PacketCodec` implements the [`Decoder`] and [`Encoder`] traits from
//! [`tokio_util::codec`], so a transport only has to supply an ordered byte
//! pipe (`AsyncRead + AsyncWrite`); everything above the pipe is handled by
//! the protocol layer.
//!
//! Frame layout: a 4-byte big-endian length prefix covering the envelope
//! (flags + id + payload), followed by the envelope itself. Frames whose
//! payload would exceed the configured maximum are rejected before
//! allocation.

use crate::core::packet::{Packet, HEADER_SIZE};
use crate::error::{NetronError, Result};
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

const LENGTH_PREFIX: usize = 4;

pub struct PacketCodec {
    max_payload: usize,
}

impl PacketCodec {
    pub fn new(max_payload: usize) -> Self {
        Self { max_payload }
    }
}

impl Default for PacketCodec {
    fn default() -> Self {
        Self::new(crate::config::MAX_PAYLOAD_SIZE)
    }
}

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = NetronError;

    /// Decodes a packet from the byte stream.
    ///
    /// Returns `None` until a complete frame has been buffered. Frames
    /// shorter than the envelope header are consumed and skipped in place;
    /// a decoder error would fuse the framed stream and kill the
    /// connection, and a single malformed frame must not do that.
    ///
    /// # Errors
    /// `OversizedPacket` for a frame exceeding the payload limit.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Packet>> {
        loop {
            if src.len() < LENGTH_PREFIX {
                return Ok(None);
            }

            let len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
            if len >= HEADER_SIZE && len - HEADER_SIZE > self.max_payload {
                return Err(NetronError::OversizedPacket(len - HEADER_SIZE));
            }

            if src.len() < LENGTH_PREFIX + len {
                // Wait for the full frame
                src.reserve(LENGTH_PREFIX + len - src.len());
                return Ok(None);
            }

            if len < HEADER_SIZE {
                src.advance(LENGTH_PREFIX + len);
                warn!(len, "malformed frame skipped");
                continue;
            }

            src.advance(LENGTH_PREFIX);
            let frame = src.split_to(len).freeze();
            return Packet::from_bytes(&frame).map(Some);
        }
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = NetronError;

    fn encode(&mut self, packet: Packet, dst: &mut BytesMut) -> Result<()> {
        if packet.payload.len() > self.max_payload {
            return Err(NetronError::OversizedPacket(packet.payload.len()));
        }

        let envelope_len = HEADER_SIZE + packet.payload.len();
        dst.reserve(LENGTH_PREFIX + envelope_len);

        dst.put_u32(envelope_len as u32);
        dst.put_u8(packet.flags());
        dst.put_u32(packet.id);
        dst.put_slice(&packet.payload);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::packet::Action;
    use bytes::Bytes;

    #[test]
    fn encode_decode_round_trip() {
        let mut codec = PacketCodec::default();
        let packet = Packet::request(Action::Get, 42, Bytes::from_static(b"payload"));

        let mut buf = BytesMut::new();
        codec.encode(packet.clone(), &mut buf).unwrap();

        let decoded = codec.decode(&mut buf).unwrap().expect("one full frame");
        assert_eq!(decoded, packet);
        assert!(buf.is_empty());
    }

    #[test]
    fn partial_frame_waits() {
        let mut codec = PacketCodec::default();
        let packet = Packet::request(Action::Set, 1, Bytes::from_static(b"abcdef"));

        let mut buf = BytesMut::new();
        codec.encode(packet, &mut buf).unwrap();
        let mut partial = buf.split_to(buf.len() - 3);

        assert!(codec.decode(&mut partial).unwrap().is_none());
        partial.unsplit(buf);
        assert!(codec.decode(&mut partial).unwrap().is_some());
    }

    #[test]
    fn two_frames_in_one_buffer() {
        let mut codec = PacketCodec::default();
        let first = Packet::request(Action::Ping, 1, Bytes::new());
        let second = Packet::response(Action::Ping, 1, Bytes::new());

        let mut buf = BytesMut::new();
        codec.encode(first.clone(), &mut buf).unwrap();
        codec.encode(second.clone(), &mut buf).unwrap();

        assert_eq!(codec.decode(&mut buf).unwrap(), Some(first));
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(second));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn oversized_frame_rejected() {
        let mut codec = PacketCodec::new(16);
        let packet = Packet::request(Action::StreamData, 9, Bytes::from(vec![0u8; 64]));

        let mut buf = BytesMut::new();
        let err = codec.encode(packet, &mut buf).unwrap_err();
        assert!(matches!(err, NetronError::OversizedPacket(64)));
    }

    #[test]
    fn undersized_frame_is_skipped_not_fatal() {
        let mut codec = PacketCodec::default();
        let good = Packet::request(Action::Ping, 3, Bytes::from_static(b"ok"));

        // A bogus 2-byte frame directly in front of a valid one
        let mut buf = BytesMut::from(&[0u8, 0, 0, 2, 0xAA, 0xBB][..]);
        codec.encode(good.clone(), &mut buf).unwrap();

        assert_eq!(codec.decode(&mut buf).unwrap(), Some(good));
        assert!(buf.is_empty());
    }

    #[test]
    fn lone_undersized_frame_waits_for_more_input() {
        let mut codec = PacketCodec::default();
        let mut buf = BytesMut::from(&[0u8, 0, 0, 2, 0xAA, 0xBB][..]);

        // Skipping the bogus frame leaves nothing to decode yet
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert!(buf.is_empty());
    }
}
