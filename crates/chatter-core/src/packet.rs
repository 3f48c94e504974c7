//! Packet model.
//!
//! Every message exchanged between a client and the relay is a [`Packet`].
//! Packets are built per send and never persisted.

use serde::{Deserialize, Serialize};

use crate::constants::{SERVER_COLOR, SERVER_USERNAME};
use crate::ids::ConnectionId;

/// A chat line as typed by a user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Display name of the author.
    pub username: String,
    /// Message body.
    pub text: String,
    /// Color tag the author picked (free-form, e.g. `"red"` or `"#FF0000"`).
    pub color: String,
}

impl ChatMessage {
    /// Create a chat message.
    pub fn new(
        username: impl Into<String>,
        text: impl Into<String>,
        color: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            text: text.into(),
            color: color.into(),
        }
    }

    /// A notice authored by the relay itself.
    pub fn server_notice(text: impl Into<String>) -> Self {
        Self::new(SERVER_USERNAME, text, SERVER_COLOR)
    }
}

/// A join or leave announcement, carrying the roster after the change.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Presence {
    /// Username joining or leaving.
    pub username: String,
    /// Identity of the connection joining or leaving.
    pub identity: ConnectionId,
    /// `true` for a join, `false` for a leave.
    pub joining: bool,
    /// Usernames present after the change, in join order.
    pub roster: Vec<String>,
}

impl Presence {
    /// A join announcement with an empty roster, as sent by a client.
    pub fn announce(username: impl Into<String>, identity: ConnectionId) -> Self {
        Self {
            username: username.into(),
            identity,
            joining: true,
            roster: Vec::new(),
        }
    }
}

/// Tagged message variants exchanged over the wire.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Packet {
    /// Liveness probe; the receiver echoes it back unchanged.
    Heartbeat,
    /// A chat line, broadcast to every connection.
    Chat(ChatMessage),
    /// A presence change, broadcast to every connection.
    Presence(Presence),
    /// A packet addressed to exactly one connection.
    Envelope {
        /// Identity of the single recipient.
        target: ConnectionId,
        /// The packet delivered to the recipient.
        payload: Box<Packet>,
    },
}

/// Discriminant of a [`Packet`], used for logging and metrics labels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PacketKind {
    /// [`Packet::Heartbeat`].
    Heartbeat,
    /// [`Packet::Chat`].
    Chat,
    /// [`Packet::Presence`].
    Presence,
    /// [`Packet::Envelope`].
    Envelope,
}

impl PacketKind {
    /// Lowercase label for logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Heartbeat => "heartbeat",
            Self::Chat => "chat",
            Self::Presence => "presence",
            Self::Envelope => "envelope",
        }
    }
}

impl std::fmt::Display for PacketKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Packet {
    /// Wrap `payload` for delivery to `target` only.
    pub fn envelope(target: ConnectionId, payload: Packet) -> Self {
        Self::Envelope {
            target,
            payload: Box::new(payload),
        }
    }

    /// The variant of this packet.
    pub fn kind(&self) -> PacketKind {
        match self {
            Self::Heartbeat => PacketKind::Heartbeat,
            Self::Chat(_) => PacketKind::Chat,
            Self::Presence(_) => PacketKind::Presence,
            Self::Envelope { .. } => PacketKind::Envelope,
        }
    }

    /// Whether this packet is a heartbeat.
    pub fn is_heartbeat(&self) -> bool {
        matches!(self, Self::Heartbeat)
    }
}

impl From<ChatMessage> for Packet {
    fn from(message: ChatMessage) -> Self {
        Self::Chat(message)
    }
}

impl From<Presence> for Packet {
    fn from(presence: Presence) -> Self {
        Self::Presence(presence)
    }
}
