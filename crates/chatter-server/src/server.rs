//! `ChatServer`: start/stop façade over the relay's tasks.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use ::metrics::gauge;
use chatter_core::{ConnectionId, Packet};
use chatter_net::DisconnectReason;
use parking_lot::Mutex;
use tokio::sync::{Notify, broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::ServerConfig;
use crate::errors::ServerError;
use crate::events::{EventSink, RouterEvent, ServerEvent};
use crate::listener::Listener;
use crate::metrics::{CONNECTIONS_ACTIVE, ROSTER_SIZE};
use crate::presence::{PresenceService, Roster};
use crate::registry::Registry;
use crate::router::{Router, deliver_to_all};
use crate::shutdown::ShutdownCoordinator;

/// A running relay.
pub struct ChatServer {
    config: ServerConfig,
    local_addr: SocketAddr,
    registry: Arc<Registry>,
    roster: Arc<Mutex<Roster>>,
    router_events: EventSink,
    server_events: broadcast::Sender<ServerEvent>,
    shutdown: ShutdownCoordinator,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl ChatServer {
    /// Bind and spawn the listener, router and presence service.
    ///
    /// The returned receiver is subscribed before anything is accepted, so it
    /// sees every event.
    pub async fn start(
        config: ServerConfig,
    ) -> Result<(Self, broadcast::Receiver<ServerEvent>), ServerError> {
        let registry = Arc::new(Registry::new());
        let roster = Arc::new(Mutex::new(Roster::new()));
        let wake = Arc::new(Notify::new());
        let (lifecycle, presence_rx) = mpsc::unbounded_channel();
        let router_events =
            EventSink::new(broadcast::channel(config.event_capacity).0).with_lifecycle(lifecycle);
        let (server_events, server_rx) = broadcast::channel(config.event_capacity);

        let listener = Listener::bind(
            &config.host,
            config.port,
            Arc::clone(&registry),
            router_events.clone(),
            config.connection,
            Arc::clone(&wake),
        )
        .await?;
        let local_addr = listener.local_addr()?;

        let shutdown = ShutdownCoordinator::new();
        let presence = PresenceService::new(
            Arc::clone(&registry),
            Arc::clone(&roster),
            router_events.clone(),
            server_events.clone(),
        );
        let router = Router::new(
            Arc::clone(&registry),
            wake,
            router_events.clone(),
            config.sweep_interval,
        );
        let tasks = vec![
            tokio::spawn(presence.run(presence_rx, shutdown.token())),
            tokio::spawn(router.run(shutdown.token())),
            tokio::spawn(listener.run(shutdown.token())),
        ];

        info!(%local_addr, "chat server started");
        let server = Self {
            config,
            local_addr,
            registry,
            roster,
            router_events,
            server_events,
            shutdown,
            tasks: Mutex::new(tasks),
            stopped: AtomicBool::new(false),
        };
        Ok((server, server_rx))
    }

    /// Address actually bound.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Registered connections.
    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    /// Identities of registered connections, in registration order.
    pub fn connections(&self) -> Vec<ConnectionId> {
        self.registry.identities()
    }

    /// Announced usernames, in join order.
    pub fn roster(&self) -> Vec<String> {
        self.roster.lock().usernames()
    }

    /// A fresh collaborator event receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.server_events.subscribe()
    }

    /// A fresh transport event receiver. Lossy under load: a receiver that
    /// falls behind skips the oldest events.
    pub fn subscribe_router(&self) -> broadcast::Receiver<RouterEvent> {
        self.router_events.subscribe()
    }

    /// Send a relay-originated packet to every registered connection.
    /// Returns the number of successful deliveries.
    pub async fn broadcast(&self, packet: &Packet) -> usize {
        let snapshot = self.registry.snapshot();
        deliver_to_all(&snapshot, packet, None, &self.router_events).await
    }

    /// Whether [`stop`](Self::stop) has been called.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Stop accepting, wait for the relay tasks, then disconnect everyone.
    /// Only the first call does anything.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        let tasks = std::mem::take(&mut *self.tasks.lock());
        let clean = self
            .shutdown
            .graceful_shutdown(tasks, Some(self.config.shutdown_timeout))
            .await;

        let remaining = self.registry.drain();
        for connection in &remaining {
            let _ = connection.disconnect().await;
            self.router_events.publish(RouterEvent::ConnectionRemoved {
                id: connection.id().clone(),
                peer: connection.peer_addr(),
                reason: DisconnectReason::Disconnected,
            });
            let _ = self
                .server_events
                .send(ServerEvent::ClientLeft(connection.id().clone()));
            let _ = self.server_events.send(ServerEvent::output(format!(
                "Client disconnected: {}",
                connection.peer_addr()
            )));
        }
        *self.roster.lock() = Roster::new();
        gauge!(CONNECTIONS_ACTIVE).set(0.0);
        gauge!(ROSTER_SIZE).set(0.0);
        info!(
            disconnected = remaining.len(),
            clean,
            "chat server stopped"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chatter_core::ChatMessage;
    use chatter_net::testing::receive_within;
    use chatter_net::{ConnectOptions, Connection, ConnectionConfig};

    use super::*;

    const WAIT: Duration = Duration::from_secs(2);

    async fn join(server: &ChatServer) -> (Connection, Arc<Notify>) {
        let wake = Arc::new(Notify::new());
        let conn = Connection::connect(
            "127.0.0.1",
            server.local_addr().port(),
            &ConnectOptions::default(),
            ConnectionConfig::client(),
            Arc::clone(&wake),
        )
        .await
        .unwrap();
        (conn, wake)
    }

    async fn wait_for_count(server: &ChatServer, n: usize) {
        tokio::time::timeout(WAIT, async {
            while server.connection_count() != n {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn start_binds_auto_port() {
        let (server, _events) = ChatServer::start(ServerConfig::default()).await.unwrap();
        assert_ne!(server.local_addr().port(), 0);
        assert_eq!(server.connection_count(), 0);
        assert!(server.roster().is_empty());
        server.stop().await;
    }

    #[tokio::test]
    async fn start_reports_bind_conflict() {
        let (first, _events) = ChatServer::start(ServerConfig::default()).await.unwrap();
        let config = ServerConfig {
            port: first.local_addr().port(),
            ..ServerConfig::default()
        };
        let result = ChatServer::start(config).await;
        assert!(matches!(result, Err(ServerError::Bind { .. })));
        first.stop().await;
    }

    #[tokio::test]
    async fn join_is_reported_to_collaborators() {
        let (server, mut events) = ChatServer::start(ServerConfig::default()).await.unwrap();
        let (client, _wake) = join(&server).await;

        let first = tokio::time::timeout(WAIT, events.recv()).await.unwrap().unwrap();
        assert_eq!(first, ServerEvent::ClientJoined(client.id().clone()));
        let second = tokio::time::timeout(WAIT, events.recv()).await.unwrap().unwrap();
        assert!(second.output_text().unwrap().starts_with("Client connected: "));
        server.stop().await;
    }

    #[tokio::test]
    async fn broadcast_reaches_every_connection() {
        let (server, _events) = ChatServer::start(ServerConfig::default()).await.unwrap();
        let (a, a_wake) = join(&server).await;
        let (b, b_wake) = join(&server).await;
        wait_for_count(&server, 2).await;

        let notice = Packet::Chat(ChatMessage::server_notice("maintenance at noon"));
        assert_eq!(server.broadcast(&notice).await, 2);
        assert_eq!(receive_within(&a, &a_wake, WAIT).await, Some(notice.clone()));
        assert_eq!(receive_within(&b, &b_wake, WAIT).await, Some(notice));
        server.stop().await;
    }

    #[tokio::test]
    async fn stop_disconnects_everyone_once() {
        let (server, mut events) = ChatServer::start(ServerConfig::default()).await.unwrap();
        let (client, wake) = join(&server).await;
        wait_for_count(&server, 1).await;
        while events.try_recv().is_ok() {}

        server.stop().await;
        server.stop().await;
        assert!(server.is_stopped());
        assert_eq!(server.connection_count(), 0);

        let mut left = 0;
        while let Ok(event) = events.try_recv() {
            if event == ServerEvent::ClientLeft(client.id().clone()) {
                left += 1;
            }
        }
        assert_eq!(left, 1);

        let quiet = Duration::from_millis(200);
        assert_eq!(receive_within(&client, &wake, quiet).await, None);
        assert!(client.is_disconnected());
    }
}
