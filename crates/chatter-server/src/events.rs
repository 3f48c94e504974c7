//! Typed events emitted by the relay.
//!
//! [`RouterEvent`] is the transport-level stream (one event per accept,
//! removal, received packet and delivery), published through an
//! [`EventSink`]. [`ServerEvent`] is the coarser stream collaborators render.

use std::net::SocketAddr;

use chatter_core::{ConnectionId, Packet};
use chatter_net::DisconnectReason;
use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc};
use tracing::trace;

/// Transport-level relay event.
#[derive(Clone, Debug, PartialEq)]
pub enum RouterEvent {
    /// A socket completed the handshake and was registered.
    ConnectionAccepted {
        /// Assigned identity.
        id: ConnectionId,
        /// Remote address.
        peer: SocketAddr,
    },
    /// A connection left the registry. Emitted exactly once per connection.
    ConnectionRemoved {
        /// Identity of the removed connection.
        id: ConnectionId,
        /// Remote address.
        peer: SocketAddr,
        /// What ended it.
        reason: DisconnectReason,
    },
    /// A packet was decoded from a connection.
    PacketReceived {
        /// Sender identity.
        from: ConnectionId,
        /// The packet as received.
        packet: Packet,
    },
    /// A packet was written to one recipient of a broadcast.
    PacketSent {
        /// Sender identity, `None` for relay-originated packets.
        from: Option<ConnectionId>,
        /// Recipient identity.
        to: ConnectionId,
    },
    /// An envelope's target was found in the registry.
    PersonalPacketReceived {
        /// Sender identity.
        from: ConnectionId,
        /// Envelope target.
        target: ConnectionId,
        /// The unwrapped payload.
        payload: Packet,
    },
    /// An envelope's payload was written to its target.
    PersonalPacketSent {
        /// Sender identity.
        from: ConnectionId,
        /// Recipient identity.
        to: ConnectionId,
    },
    /// A write to one recipient failed; delivery to the rest continued.
    SendFailed {
        /// Sender identity, `None` for relay-originated packets.
        from: Option<ConnectionId>,
        /// Recipient identity.
        to: ConnectionId,
    },
}

impl RouterEvent {
    /// Whether the roster depends on this event. Lifecycle events are
    /// queued losslessly; the rest are per-delivery diagnostics.
    pub fn is_lifecycle(&self) -> bool {
        matches!(
            self,
            Self::ConnectionAccepted { .. }
                | Self::ConnectionRemoved { .. }
                | Self::PersonalPacketReceived { .. }
                | Self::PersonalPacketSent { .. }
        )
    }
}

/// Where the listener and router publish [`RouterEvent`]s.
///
/// Every event goes to the diagnostic broadcast, which drops the oldest
/// entries for a subscriber that falls behind. Lifecycle events are also
/// queued on the lifecycle channel, which never drops.
#[derive(Clone, Debug)]
pub struct EventSink {
    diagnostics: broadcast::Sender<RouterEvent>,
    lifecycle: Option<mpsc::UnboundedSender<RouterEvent>>,
}

impl EventSink {
    /// A sink publishing to `diagnostics` only.
    pub fn new(diagnostics: broadcast::Sender<RouterEvent>) -> Self {
        Self {
            diagnostics,
            lifecycle: None,
        }
    }

    /// Also queue lifecycle events on `lifecycle`.
    #[must_use]
    pub fn with_lifecycle(mut self, lifecycle: mpsc::UnboundedSender<RouterEvent>) -> Self {
        self.lifecycle = Some(lifecycle);
        self
    }

    /// A fresh diagnostic receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<RouterEvent> {
        self.diagnostics.subscribe()
    }

    /// Publish `event`.
    pub fn publish(&self, event: RouterEvent) {
        if let Some(lifecycle) = self.lifecycle.as_ref().filter(|_| event.is_lifecycle()) {
            if lifecycle.send(event.clone()).is_err() {
                trace!("lifecycle receiver closed");
            }
        }
        let _ = self.diagnostics.send(event);
    }
}

/// Collaborator-level relay event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ServerEvent {
    /// A client connected.
    ClientJoined(ConnectionId),
    /// A client disconnected.
    ClientLeft(ConnectionId),
    /// A line for the operator's output log.
    OutputLogged {
        /// When the line was produced.
        at: DateTime<Utc>,
        /// The line.
        text: String,
    },
}

impl ServerEvent {
    /// An output line stamped with the current time.
    pub fn output(text: impl Into<String>) -> Self {
        Self::OutputLogged {
            at: Utc::now(),
            text: text.into(),
        }
    }

    /// The output text, if this is an output line.
    pub fn output_text(&self) -> Option<&str> {
        match self {
            Self::OutputLogged { text, .. } => Some(text),
            _ => None,
        }
    }
}
