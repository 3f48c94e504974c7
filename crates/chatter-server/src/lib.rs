//! # chatter-server
//!
//! The Chatter relay.
//!
//! - [`Listener`]: accepts sockets, assigns identities, registers connections
//! - [`Registry`]: the live connections keyed by identity
//! - [`Router`]: dispatch loop (unicast, broadcast, heartbeat echo) plus the liveness sweep
//! - [`PresenceService`]: roster bookkeeping, join/leave notices, operator output
//! - [`ChatServer`]: start/stop façade wiring the above together
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod errors;
pub mod events;
pub mod listener;
pub mod metrics;
pub mod presence;
pub mod registry;
pub mod router;
pub mod server;
pub mod shutdown;

pub use config::ServerConfig;
pub use errors::ServerError;
pub use events::{EventSink, RouterEvent, ServerEvent};
pub use listener::Listener;
pub use presence::{PresenceService, Roster};
pub use registry::Registry;
pub use router::Router;
pub use server::ChatServer;
