//! Wire format.
//!
//! A message on the wire is a 4-byte big-endian length prefix followed by a
//! tagged payload: one tag byte and the variant's fields.
//!
//! | tag | variant    | fields                                                  |
//! |-----|------------|---------------------------------------------------------|
//! | 0   | Heartbeat  | none                                                    |
//! | 1   | Chat       | username, text, color (strings)                         |
//! | 2   | Presence   | username, identity (strings), joining (u8), roster      |
//! | 3   | Envelope   | target (string), payload (nested length-prefixed message) |
//!
//! Strings are a `u32` big-endian byte count followed by UTF-8 bytes. A roster
//! is a `u32` big-endian count followed by that many strings.
//!
//! Framing is handled by [`frame_codec`] (a [`LengthDelimitedCodec`] that
//! accumulates bytes until a whole frame is buffered); [`encode_packet`] and
//! [`decode_packet`] translate between a frame body and a [`Packet`].

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio_util::codec::LengthDelimitedCodec;

use crate::ids::ConnectionId;
use crate::packet::{ChatMessage, Packet, Presence};

/// Tag byte for [`Packet::Heartbeat`].
pub const TAG_HEARTBEAT: u8 = 0;
/// Tag byte for [`Packet::Chat`].
pub const TAG_CHAT: u8 = 1;
/// Tag byte for [`Packet::Presence`].
pub const TAG_PRESENCE: u8 = 2;
/// Tag byte for [`Packet::Envelope`].
pub const TAG_ENVELOPE: u8 = 3;

/// Deepest chain of envelopes a decoder will follow.
pub const MAX_ENVELOPE_DEPTH: usize = 8;

/// Width of every length and count field.
const LEN_BYTES: usize = 4;

/// A frame body that could not be turned into a [`Packet`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The frame carried no tag byte.
    #[error("empty payload")]
    Empty,
    /// The tag byte names no known variant.
    #[error("unknown packet tag {0}")]
    UnknownTag(u8),
    /// A field ran past the end of the frame.
    #[error("truncated {field}: need {needed} bytes, have {available}")]
    Truncated {
        /// Field being read.
        field: &'static str,
        /// Bytes the field declared.
        needed: usize,
        /// Bytes left in the frame.
        available: usize,
    },
    /// A string field was not valid UTF-8.
    #[error("invalid UTF-8 in {0}")]
    InvalidUtf8(&'static str),
    /// A boolean byte was neither 0 nor 1.
    #[error("invalid boolean byte {0:#04x}")]
    InvalidBool(u8),
    /// Bytes were left over after the payload.
    #[error("{0} trailing bytes after payload")]
    TrailingBytes(usize),
    /// Envelopes were nested past [`MAX_ENVELOPE_DEPTH`].
    #[error("envelopes nested deeper than {0}")]
    TooDeep(usize),
}

/// Build the framing codec: 4-byte big-endian length prefix, bodies capped at
/// `max_frame_bytes`.
pub fn frame_codec(max_frame_bytes: usize) -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .big_endian()
        .length_field_length(LEN_BYTES)
        .max_frame_length(max_frame_bytes)
        .new_codec()
}

/// Encode a packet as a frame body (tag byte plus fields, no outer length).
pub fn encode_packet(packet: &Packet) -> Bytes {
    let mut buf = BytesMut::new();
    put_payload(&mut buf, packet);
    buf.freeze()
}

/// Encode a packet as a complete frame, outer length prefix included.
pub fn encode_frame(packet: &Packet) -> Bytes {
    let body = encode_packet(packet);
    let mut buf = BytesMut::with_capacity(LEN_BYTES + body.len());
    put_len(&mut buf, body.len());
    buf.put_slice(&body);
    buf.freeze()
}

/// Decode a frame body into a packet.
pub fn decode_packet(mut body: Bytes) -> Result<Packet, DecodeError> {
    let packet = read_payload(&mut body, 0)?;
    if body.has_remaining() {
        return Err(DecodeError::TrailingBytes(body.remaining()));
    }
    Ok(packet)
}

// ── Encoding ────────────────────────────────────────────────────────────────

// Frames are capped at `MAX_FRAME_BYTES`, far below `u32::MAX`.
#[allow(clippy::cast_possible_truncation)]
fn put_len(buf: &mut BytesMut, len: usize) {
    buf.put_u32(len as u32);
}

fn put_str(buf: &mut BytesMut, s: &str) {
    put_len(buf, s.len());
    buf.put_slice(s.as_bytes());
}

fn put_payload(buf: &mut BytesMut, packet: &Packet) {
    match packet {
        Packet::Heartbeat => buf.put_u8(TAG_HEARTBEAT),
        Packet::Chat(message) => {
            buf.put_u8(TAG_CHAT);
            put_str(buf, &message.username);
            put_str(buf, &message.text);
            put_str(buf, &message.color);
        }
        Packet::Presence(presence) => {
            buf.put_u8(TAG_PRESENCE);
            put_str(buf, &presence.username);
            put_str(buf, presence.identity.as_str());
            buf.put_u8(u8::from(presence.joining));
            put_len(buf, presence.roster.len());
            for name in &presence.roster {
                put_str(buf, name);
            }
        }
        Packet::Envelope { target, payload } => {
            buf.put_u8(TAG_ENVELOPE);
            put_str(buf, target.as_str());
            let inner = encode_packet(payload);
            put_len(buf, inner.len());
            buf.put_slice(&inner);
        }
    }
}

// ── Decoding ────────────────────────────────────────────────────────────────

fn ensure(buf: &Bytes, needed: usize, field: &'static str) -> Result<(), DecodeError> {
    if buf.remaining() < needed {
        return Err(DecodeError::Truncated {
            field,
            needed,
            available: buf.remaining(),
        });
    }
    Ok(())
}

fn read_len(buf: &mut Bytes, field: &'static str) -> Result<usize, DecodeError> {
    ensure(buf, LEN_BYTES, field)?;
    Ok(buf.get_u32() as usize)
}

fn read_string(buf: &mut Bytes, field: &'static str) -> Result<String, DecodeError> {
    let len = read_len(buf, field)?;
    ensure(buf, len, field)?;
    let raw = buf.split_to(len);
    String::from_utf8(raw.to_vec()).map_err(|_| DecodeError::InvalidUtf8(field))
}

fn read_bool(buf: &mut Bytes, field: &'static str) -> Result<bool, DecodeError> {
    ensure(buf, 1, field)?;
    match buf.get_u8() {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(DecodeError::InvalidBool(other)),
    }
}

fn read_payload(buf: &mut Bytes, depth: usize) -> Result<Packet, DecodeError> {
    if !buf.has_remaining() {
        return Err(DecodeError::Empty);
    }
    match buf.get_u8() {
        TAG_HEARTBEAT => Ok(Packet::Heartbeat),
        TAG_CHAT => {
            let username = read_string(buf, "username")?;
            let text = read_string(buf, "text")?;
            let color = read_string(buf, "color")?;
            Ok(Packet::Chat(ChatMessage {
                username,
                text,
                color,
            }))
        }
        TAG_PRESENCE => {
            let username = read_string(buf, "username")?;
            let identity = ConnectionId::from_string(read_string(buf, "identity")?);
            let joining = read_bool(buf, "joining")?;
            let count = read_len(buf, "roster count")?;
            // Every entry needs at least its length field; cap the
            // preallocation by what the frame can actually hold.
            let mut roster = Vec::with_capacity(count.min(buf.remaining() / LEN_BYTES));
            for _ in 0..count {
                roster.push(read_string(buf, "roster entry")?);
            }
            Ok(Packet::Presence(Presence {
                username,
                identity,
                joining,
                roster,
            }))
        }
        TAG_ENVELOPE => {
            if depth >= MAX_ENVELOPE_DEPTH {
                return Err(DecodeError::TooDeep(MAX_ENVELOPE_DEPTH));
            }
            let target = ConnectionId::from_string(read_string(buf, "target")?);
            let len = read_len(buf, "payload length")?;
            ensure(buf, len, "payload")?;
            let mut inner = buf.split_to(len);
            let payload = read_payload(&mut inner, depth + 1)?;
            if inner.has_remaining() {
                return Err(DecodeError::TrailingBytes(inner.remaining()));
            }
            Ok(Packet::envelope(target, payload))
        }
        other => Err(DecodeError::UnknownTag(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use proptest::prelude::*;
    use tokio_util::codec::{Decoder, Encoder};

    fn chat() -> Packet {
        ChatMessage::new("alice", "hi", "red").into()
    }

    #[test]
    fn heartbeat_frame_layout() {
        let frame = encode_frame(&Packet::Heartbeat);
        assert_eq!(&frame[..], &[0, 0, 0, 1, TAG_HEARTBEAT]);
    }

    #[test]
    fn chat_body_layout() {
        let body = encode_packet(&chat());
        let expected: Vec<u8> = [
            &[TAG_CHAT][..],
            &[0, 0, 0, 5],
            b"alice",
            &[0, 0, 0, 2],
            b"hi",
            &[0, 0, 0, 3],
            b"red",
        ]
        .concat();
        assert_eq!(&body[..], &expected[..]);
    }

    #[test]
    fn presence_body_layout() {
        let packet = Packet::Presence(Presence {
            username: "bob".into(),
            identity: "b2".into(),
            joining: true,
            roster: vec!["alice".into(), "bob".into()],
        });
        let body = encode_packet(&packet);
        let expected: Vec<u8> = [
            &[TAG_PRESENCE][..],
            &[0, 0, 0, 3],
            b"bob",
            &[0, 0, 0, 2],
            b"b2",
            &[1],
            &[0, 0, 0, 2],
            &[0, 0, 0, 5],
            b"alice",
            &[0, 0, 0, 3],
            b"bob",
        ]
        .concat();
        assert_eq!(&body[..], &expected[..]);
        assert_eq!(decode_packet(body).unwrap(), packet);
    }

    #[test]
    fn envelope_nests_a_length_prefixed_message() {
        let packet = Packet::envelope("g1".into(), Packet::Heartbeat);
        let body = encode_packet(&packet);
        let expected: Vec<u8> = [
            &[TAG_ENVELOPE][..],
            &[0, 0, 0, 2],
            b"g1",
            &[0, 0, 0, 1],
            &[TAG_HEARTBEAT],
        ]
        .concat();
        assert_eq!(&body[..], &expected[..]);
        assert_eq!(decode_packet(body).unwrap(), packet);
    }

    #[test]
    fn empty_body_is_rejected() {
        assert_eq!(decode_packet(Bytes::new()), Err(DecodeError::Empty));
    }

    #[test]
    fn unknown_tag_is_rejected() {
        assert_eq!(
            decode_packet(Bytes::from_static(&[9])),
            Err(DecodeError::UnknownTag(9))
        );
    }

    #[test]
    fn truncated_string_is_rejected() {
        let body = Bytes::from_static(&[TAG_CHAT, 0, 0, 0, 10, b'a', b'b']);
        assert_matches!(
            decode_packet(body),
            Err(DecodeError::Truncated { field: "username", needed: 10, available: 2 })
        );
    }

    #[test]
    fn invalid_utf8_is_rejected() {
        let body: Vec<u8> = [
            &[TAG_CHAT][..],
            &[0, 0, 0, 2],
            &[0xff, 0xfe],
            &[0, 0, 0, 0],
            &[0, 0, 0, 0],
        ]
        .concat();
        assert_eq!(
            decode_packet(Bytes::from(body)),
            Err(DecodeError::InvalidUtf8("username"))
        );
    }

    #[test]
    fn invalid_bool_is_rejected() {
        let body: Vec<u8> = [
            &[TAG_PRESENCE][..],
            &[0, 0, 0, 0],
            &[0, 0, 0, 0],
            &[7],
            &[0, 0, 0, 0],
        ]
        .concat();
        assert_eq!(
            decode_packet(Bytes::from(body)),
            Err(DecodeError::InvalidBool(7))
        );
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let body = Bytes::from_static(&[TAG_HEARTBEAT, 0xAA]);
        assert_eq!(decode_packet(body), Err(DecodeError::TrailingBytes(1)));
    }

    #[test]
    fn oversized_roster_count_does_not_preallocate() {
        let body: Vec<u8> = [
            &[TAG_PRESENCE][..],
            &[0, 0, 0, 0],
            &[0, 0, 0, 0],
            &[0],
            &[0xff, 0xff, 0xff, 0xff],
        ]
        .concat();
        assert_matches!(
            decode_packet(Bytes::from(body)),
            Err(DecodeError::Truncated { field: "roster entry", .. })
        );
    }

    #[test]
    fn nesting_limit_is_enforced() {
        let mut packet = Packet::Heartbeat;
        for _ in 0..MAX_ENVELOPE_DEPTH {
            packet = Packet::envelope("x".into(), packet);
        }
        assert!(decode_packet(encode_packet(&packet)).is_ok());

        let too_deep = Packet::envelope("x".into(), packet);
        assert_eq!(
            decode_packet(encode_packet(&too_deep)),
            Err(DecodeError::TooDeep(MAX_ENVELOPE_DEPTH))
        );
    }

    #[test]
    fn framing_waits_for_a_split_frame() {
        let mut codec = frame_codec(1024);
        let frame = encode_frame(&chat());
        let (head, tail) = frame.split_at(7);

        let mut buf = BytesMut::from(head);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(tail);
        let body = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decode_packet(body.freeze()).unwrap(), chat());
    }

    #[test]
    fn framing_separates_coalesced_frames() {
        let mut codec = frame_codec(1024);
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&encode_frame(&chat()));
        buf.extend_from_slice(&encode_frame(&Packet::Heartbeat));

        let first = codec.decode(&mut buf).unwrap().unwrap();
        let second = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decode_packet(first.freeze()).unwrap(), chat());
        assert_eq!(decode_packet(second.freeze()).unwrap(), Packet::Heartbeat);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn framing_rejects_oversized_frames() {
        let mut codec = frame_codec(4);
        let mut buf = BytesMut::from(&[0u8, 0, 0, 5, 1, 2, 3, 4, 5][..]);
        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn codec_encoder_matches_encode_frame() {
        let mut codec = frame_codec(1024);
        let mut out = BytesMut::new();
        codec.encode(encode_packet(&chat()), &mut out).unwrap();
        assert_eq!(&out[..], &encode_frame(&chat())[..]);
    }

    fn arb_leaf() -> impl Strategy<Value = Packet> {
        prop_oneof![
            Just(Packet::Heartbeat),
            (".*", ".*", "[a-z#0-9]{0,8}")
                .prop_map(|(u, t, c)| Packet::Chat(ChatMessage::new(u, t, c))),
            (".*", "[a-f0-9-]{0,36}", any::<bool>(), prop::collection::vec(".*", 0..6)).prop_map(
                |(username, id, joining, roster)| Packet::Presence(Presence {
                    username,
                    identity: ConnectionId::from_string(id),
                    joining,
                    roster,
                })
            ),
        ]
    }

    fn arb_packet() -> impl Strategy<Value = Packet> {
        arb_leaf().prop_recursive(3, 16, 1, |inner| {
            ("[a-f0-9-]{0,36}", inner)
                .prop_map(|(target, payload)| Packet::envelope(target.as_str().into(), payload))
        })
    }

    proptest! {
        #[test]
        fn decode_inverts_encode(packet in arb_packet()) {
            prop_assert_eq!(decode_packet(encode_packet(&packet)).unwrap(), packet);
        }

        #[test]
        fn decode_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..64)) {
            let _ = decode_packet(Bytes::from(bytes));
        }
    }
}
