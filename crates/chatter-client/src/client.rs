//! `ChatClient`: one user's session with a relay.
//!
//! After the identity handshake the client announces its username in an
//! envelope addressed to itself. The relay answers with a roster-bearing
//! presence broadcast. Two tasks run for the life of the session: the
//! heartbeat timer and a receive loop that turns packets into
//! [`ClientEvent`]s.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chatter_core::{ChatMessage, ConnectionId, Packet, Presence};
use chatter_net::{ConnectError, Connection, HeartbeatResult, run_heartbeat};
use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::ClientConfig;
use crate::events::ClientEvent;

struct Shared {
    connection: Arc<Connection>,
    username: String,
    roster: Mutex<Vec<String>>,
    events: mpsc::UnboundedSender<ClientEvent>,
    closing: AtomicBool,
    lost: AtomicBool,
}

impl Shared {
    /// Report loss once, and never after an explicit disconnect.
    fn report_lost(&self) {
        if self.closing.load(Ordering::Acquire) || self.lost.swap(true, Ordering::AcqRel) {
            return;
        }
        warn!(
            conn_id = %self.connection.id(),
            reason = ?self.connection.disconnect_reason(),
            "connection to relay lost"
        );
        let _ = self.events.send(ClientEvent::ConnectionLost);
    }

    fn handle(&self, packet: Packet) {
        match packet {
            Packet::Heartbeat => trace!("heartbeat reply"),
            Packet::Chat(message) => {
                let _ = self.events.send(ClientEvent::MessageReceived(message));
            }
            Packet::Presence(presence) => self.handle_presence(presence),
            Packet::Envelope { target, .. } => {
                debug!(target_id = %target, "ignoring envelope addressed through the relay");
            }
        }
    }

    fn handle_presence(&self, presence: Presence) {
        // our own announcement, delivered back by the relay before the roster
        if presence.joining
            && presence.roster.is_empty()
            && presence.identity == *self.connection.id()
        {
            return;
        }
        debug!(
            username = %presence.username,
            joining = presence.joining,
            size = presence.roster.len(),
            "roster changed"
        );
        self.roster.lock().clone_from(&presence.roster);
        let _ = self.events.send(ClientEvent::RosterChanged(presence.roster));
    }
}

/// A connected chat session.
pub struct ChatClient {
    shared: Arc<Shared>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ChatClient {
    /// Connect to `address:port`, announce `username`, and start the
    /// heartbeat and receive tasks.
    pub async fn connect(
        address: &str,
        port: u16,
        username: impl Into<String>,
        config: ClientConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ClientEvent>), ConnectError> {
        let username = username.into();
        let wake = Arc::new(Notify::new());
        let connection = Arc::new(
            Connection::connect(
                address,
                port,
                &config.options,
                config.connection,
                Arc::clone(&wake),
            )
            .await?,
        );
        let id = connection.id().clone();

        let announce = Packet::envelope(
            id.clone(),
            Packet::Presence(Presence::announce(username.clone(), id.clone())),
        );
        if !connection.send(&announce).await {
            let _ = connection.disconnect().await;
            return Err(ConnectError::Closed);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            connection,
            username,
            roster: Mutex::new(Vec::new()),
            events: tx,
            closing: AtomicBool::new(false),
            lost: AtomicBool::new(false),
        });
        let cancel = CancellationToken::new();
        let tasks = vec![
            tokio::spawn(heartbeat_loop(
                Arc::clone(&shared),
                config.check_interval,
                cancel.clone(),
            )),
            tokio::spawn(receive_loop(
                Arc::clone(&shared),
                wake,
                config.check_interval,
                cancel.clone(),
            )),
        ];

        info!(conn_id = %id, username = %shared.username, address, port, "joined relay");
        let client = Self {
            shared,
            cancel,
            tasks: Mutex::new(tasks),
        };
        Ok((client, rx))
    }

    /// Identity assigned by the relay.
    pub fn identity(&self) -> &ConnectionId {
        self.shared.connection.id()
    }

    /// Announced username.
    pub fn username(&self) -> &str {
        &self.shared.username
    }

    /// Roster from the latest presence broadcast.
    pub fn roster(&self) -> Vec<String> {
        self.shared.roster.lock().clone()
    }

    /// Whether the link is up and `disconnect` has not been called.
    pub fn is_connected(&self) -> bool {
        !self.shared.closing.load(Ordering::Acquire) && !self.shared.connection.is_disconnected()
    }

    /// Send a chat line. Returns `false` if it could not be written.
    pub async fn send(&self, message: ChatMessage) -> bool {
        if self.shared.closing.load(Ordering::Acquire) {
            return false;
        }
        self.shared.connection.send(&Packet::Chat(message)).await
    }

    /// Close the link and wait for the session tasks. Idempotent; no
    /// [`ClientEvent::ConnectionLost`] is emitted.
    pub async fn disconnect(&self) {
        if self.shared.closing.swap(true, Ordering::AcqRel) {
            return;
        }
        self.cancel.cancel();
        let _ = self.shared.connection.disconnect().await;
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(err) = task.await {
                warn!(error = %err, "client task failed");
            }
        }
        info!(conn_id = %self.identity(), "left relay");
    }
}

impl fmt::Debug for ChatClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatClient")
            .field("identity", self.identity())
            .field("username", &self.shared.username)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl Drop for ChatClient {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn heartbeat_loop(
    shared: Arc<Shared>,
    check_interval: Duration,
    cancel: CancellationToken,
) {
    let result = run_heartbeat(Arc::clone(&shared.connection), check_interval, cancel).await;
    match result {
        HeartbeatResult::Cancelled => {}
        HeartbeatResult::TimedOut | HeartbeatResult::Closed => {
            shared.report_lost();
            let _ = shared.connection.disconnect().await;
        }
    }
}

async fn receive_loop(
    shared: Arc<Shared>,
    wake: Arc<Notify>,
    poll_interval: Duration,
    cancel: CancellationToken,
) {
    loop {
        while let Some(packet) = shared.connection.receive() {
            shared.handle(packet);
        }
        if shared.connection.is_disconnected() {
            shared.report_lost();
            let _ = shared.connection.disconnect().await;
            return;
        }
        tokio::select! {
            () = cancel.cancelled() => return,
            () = wake.notified() => {}
            () = tokio::time::sleep(poll_interval) => {}
        }
    }
}
