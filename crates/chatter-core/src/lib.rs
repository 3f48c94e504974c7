//! # chatter-core
//!
//! Shared vocabulary for the Chatter relay.
//!
//! - **Identities**: [`ConnectionId`], the opaque token a relay assigns to every connection
//! - **Packets**: [`Packet`] with `Heartbeat`, `Chat`, `Presence` and `Envelope` variants
//! - **Wire format**: length-prefixed frames carrying a tagged payload ([`wire`])
//! - **Logging**: `tracing` subscriber setup and a capture layer for tests
//! - **Constants**: protocol timings shared by client and server

#![deny(unsafe_code)]

pub mod constants;
pub mod ids;
pub mod logging;
pub mod packet;
pub mod wire;

pub use ids::ConnectionId;
pub use packet::{ChatMessage, Packet, PacketKind, Presence};
pub use wire::{DecodeError, decode_packet, encode_packet, frame_codec};
