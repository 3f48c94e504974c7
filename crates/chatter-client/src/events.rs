//! Events surfaced to whoever drives a [`ChatClient`](crate::ChatClient).

use chatter_core::ChatMessage;

/// Something the relay told us, or the link going away.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientEvent {
    /// A chat line, including our own echoed back.
    MessageReceived(ChatMessage),
    /// The roster after a join or leave, in join order.
    RosterChanged(Vec<String>),
    /// The link ended without [`disconnect`](crate::ChatClient::disconnect)
    /// being called. Sent at most once.
    ConnectionLost,
}
