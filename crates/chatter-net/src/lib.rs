//! # chatter-net
//!
//! One endpoint of a Chatter link.
//!
//! - [`Connection`]: socket ownership, identity, non-blocking receive and bounded send
//! - [`Liveness`]: the pure heartbeat state machine driving every connection
//! - [`handshake`]: the one-line identity exchange that follows accept/connect
//! - [`run_heartbeat`]: the client-side probe timer
//! - [`testing`]: loopback connection pairs for tests

#![deny(unsafe_code)]

pub mod config;
pub mod connection;
pub mod errors;
pub mod handshake;
pub mod heartbeat;
pub mod liveness;
pub mod testing;

pub use config::{ConnectOptions, ConnectionConfig, LivenessConfig, ProbeMode};
pub use connection::Connection;
pub use errors::ConnectError;
pub use heartbeat::{HeartbeatResult, run_heartbeat};
pub use liveness::{ConnectionState, DisconnectReason, Liveness, LivenessAction};
