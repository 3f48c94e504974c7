//! Chat-room presence.
//!
//! The presence service consumes lifecycle [`RouterEvent`]s from a lossless
//! channel and keeps the roster of announced users. Join and leave announcements are rebroadcast with the
//! updated roster, followed by a relay notice. It also turns transport
//! events into the coarser [`ServerEvent`] stream.

use std::sync::Arc;

use ::metrics::gauge;
use chatter_core::{ChatMessage, ConnectionId, Packet, Presence};
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::events::{EventSink, RouterEvent, ServerEvent};
use crate::metrics::ROSTER_SIZE;
use crate::registry::Registry;
use crate::router::deliver_to_all;

/// Notice broadcast after a join.
pub const JOIN_NOTICE: &str = "A new user has joined the chat";
/// Notice broadcast after a leave.
pub const LEAVE_NOTICE: &str = "A user has left the chat";

/// Announced users keyed by the announcing connection, in join order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Roster {
    entries: Vec<(ConnectionId, String)>,
}

impl Roster {
    /// Create an empty roster.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `username` for `id`. A repeated announcement renames in place.
    pub fn upsert(&mut self, id: ConnectionId, username: String) {
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| *k == id) {
            entry.1 = username;
        } else {
            self.entries.push((id, username));
        }
    }

    /// Remove `id`, returning the username it had.
    pub fn remove(&mut self, id: &ConnectionId) -> Option<String> {
        let index = self.entries.iter().position(|(k, _)| k == id)?;
        Some(self.entries.remove(index).1)
    }

    /// Username announced by `id`.
    pub fn get(&self, id: &ConnectionId) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == id)
            .map(|(_, name)| name.as_str())
    }

    /// Whether `id` has announced itself.
    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.get(id).is_some()
    }

    /// Usernames in join order.
    pub fn usernames(&self) -> Vec<String> {
        self.entries.iter().map(|(_, name)| name.clone()).collect()
    }

    /// Number of announced users.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nobody has announced.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Roster keeper and collaborator-event source.
pub struct PresenceService {
    registry: Arc<Registry>,
    roster: Arc<Mutex<Roster>>,
    router_events: EventSink,
    server_events: broadcast::Sender<ServerEvent>,
}

impl PresenceService {
    /// Create a service over `registry`. `router_events` reports the
    /// deliveries this service makes.
    pub fn new(
        registry: Arc<Registry>,
        roster: Arc<Mutex<Roster>>,
        router_events: EventSink,
        server_events: broadcast::Sender<ServerEvent>,
    ) -> Self {
        Self {
            registry,
            roster,
            router_events,
            server_events,
        }
    }

    /// Consume `events` until `cancel` fires or every sender is gone.
    ///
    /// `events` is the lifecycle channel of the [`EventSink`] the listener
    /// and router publish to; nothing on it is ever dropped.
    pub async fn run(
        self,
        mut events: mpsc::UnboundedReceiver<RouterEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            let event = tokio::select! {
                () = cancel.cancelled() => break,
                event = events.recv() => event,
            };
            let Some(event) = event else {
                break;
            };
            self.handle(event).await;
        }
        debug!("presence service stopped");
    }

    /// React to one router event.
    pub async fn handle(&self, event: RouterEvent) {
        match event {
            RouterEvent::ConnectionAccepted { id, peer } => {
                self.emit(ServerEvent::ClientJoined(id));
                self.emit(ServerEvent::output(format!("Client connected: {peer}")));
            }
            RouterEvent::ConnectionRemoved { id, peer, .. } => {
                if let Some(username) = self.forget(&id) {
                    if !self.registry.is_empty() {
                        self.announce_leave(id.clone(), username).await;
                    }
                }
                self.emit(ServerEvent::ClientLeft(id));
                self.emit(ServerEvent::output(format!("Client disconnected: {peer}")));
            }
            RouterEvent::PersonalPacketReceived { from, payload, .. } => {
                if let Packet::Presence(presence) = payload {
                    if presence.joining {
                        self.announce_join(from, presence.username).await;
                    } else if let Some(username) = self.forget(&from) {
                        self.announce_leave(from, username).await;
                    }
                }
                self.emit(ServerEvent::output("Personal packet received"));
            }
            RouterEvent::PersonalPacketSent { .. } => {
                self.emit(ServerEvent::output("Personal packet sent"));
            }
            RouterEvent::PacketReceived { .. }
            | RouterEvent::PacketSent { .. }
            | RouterEvent::SendFailed { .. } => {}
        }
    }

    fn emit(&self, event: ServerEvent) {
        let _ = self.server_events.send(event);
    }

    fn forget(&self, id: &ConnectionId) -> Option<String> {
        let mut roster = self.roster.lock();
        let removed = roster.remove(id);
        #[allow(clippy::cast_precision_loss)]
        gauge!(ROSTER_SIZE).set(roster.len() as f64);
        removed
    }

    async fn announce_join(&self, id: ConnectionId, username: String) {
        let roster = {
            let mut roster = self.roster.lock();
            roster.upsert(id.clone(), username.clone());
            #[allow(clippy::cast_precision_loss)]
            gauge!(ROSTER_SIZE).set(roster.len() as f64);
            roster.usernames()
        };
        info!(conn_id = %id, %username, "user joined");
        let presence = Presence {
            username,
            identity: id,
            joining: true,
            roster,
        };
        self.broadcast(&Packet::Presence(presence)).await;
        self.broadcast(&Packet::Chat(ChatMessage::server_notice(JOIN_NOTICE)))
            .await;
    }

    async fn announce_leave(&self, id: ConnectionId, username: String) {
        let roster = self.roster.lock().usernames();
        info!(conn_id = %id, %username, "user left");
        let presence = Presence {
            username,
            identity: id,
            joining: false,
            roster,
        };
        self.broadcast(&Packet::Presence(presence)).await;
        self.broadcast(&Packet::Chat(ChatMessage::server_notice(LEAVE_NOTICE)))
            .await;
    }

    async fn broadcast(&self, packet: &Packet) {
        let snapshot = self.registry.snapshot();
        let _ = deliver_to_all(&snapshot, packet, None, &self.router_events).await;
    }
}
