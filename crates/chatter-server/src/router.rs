//! Dispatch loop and liveness sweep.
//!
//! Each tick walks a fresh registry snapshot. For every connection the
//! liveness timers are advanced first; a connection found `Disconnected` is
//! removed and reported once. Otherwise at most one packet is taken from it
//! and routed:
//!
//! - `Heartbeat` is echoed to the sender only
//! - `Envelope` is unwrapped and forwarded to its target, or dropped when the
//!   target is not registered
//! - anything else goes to every connection in the snapshot, sender included

use std::sync::Arc;
use std::time::Duration;

use ::metrics::{counter, gauge};
use chatter_core::{ConnectionId, Packet};
use chatter_net::{Connection, DisconnectReason, LivenessAction};
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::events::{EventSink, RouterEvent};
use crate::metrics::{
    CONNECTIONS_ACTIVE, CONNECTIONS_REMOVED_TOTAL, PACKETS_ROUTED_TOTAL, SEND_FAILURES_TOTAL,
    UNICAST_DROPS_TOTAL,
};
use crate::registry::Registry;

/// Deliver `packet` to every connection in `recipients`, in order.
///
/// A failed write is reported as [`RouterEvent::SendFailed`] and delivery
/// continues. Returns the number of successful deliveries.
pub async fn deliver_to_all(
    recipients: &[Arc<Connection>],
    packet: &Packet,
    from: Option<&ConnectionId>,
    events: &EventSink,
) -> usize {
    let mut delivered = 0;
    for recipient in recipients {
        if recipient.send(packet).await {
            delivered += 1;
            events.publish(RouterEvent::PacketSent {
                from: from.cloned(),
                to: recipient.id().clone(),
            });
        } else {
            report_send_failure(from, recipient.id(), events);
        }
    }
    debug!(
        packet = %packet.kind(),
        recipients = recipients.len(),
        delivered,
        "broadcast"
    );
    delivered
}

fn report_send_failure(
    from: Option<&ConnectionId>,
    to: &ConnectionId,
    events: &EventSink,
) {
    counter!(SEND_FAILURES_TOTAL).increment(1);
    warn!(conn_id = %to, "failed to deliver packet");
    events.publish(RouterEvent::SendFailed {
        from: from.cloned(),
        to: to.clone(),
    });
}

/// The relay's dispatch loop.
pub struct Router {
    registry: Arc<Registry>,
    wake: Arc<Notify>,
    events: EventSink,
    sweep_interval: Duration,
}

impl Router {
    /// Create a router over `registry`. `wake` must be the handle given to
    /// every registered connection.
    pub fn new(
        registry: Arc<Registry>,
        wake: Arc<Notify>,
        events: EventSink,
        sweep_interval: Duration,
    ) -> Self {
        Self {
            registry,
            wake,
            events,
            sweep_interval,
        }
    }

    /// Run until `cancel` fires.
    ///
    /// A tick that made progress is followed straight away by another;
    /// otherwise the loop sleeps until a connection wakes it or the sweep
    /// interval elapses.
    pub async fn run(self, cancel: CancellationToken) {
        let mut sweep = tokio::time::interval(self.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let progressed = self.tick().await;
            if cancel.is_cancelled() {
                break;
            }
            if progressed > 0 {
                tokio::task::yield_now().await;
                continue;
            }
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = self.wake.notified() => {}
                _ = sweep.tick() => {}
            }
        }
        debug!("router stopped");
    }

    /// One pass over the current snapshot. Returns how many frames were
    /// consumed: packets routed plus undecodable frames dropped with more
    /// queued behind them.
    pub async fn tick(&self) -> usize {
        let snapshot = self.registry.snapshot();
        let mut progressed = 0;
        for connection in &snapshot {
            if connection.poll_liveness() == LivenessAction::SendProbe
                && !connection.probe_liveness().await
            {
                trace!(conn_id = %connection.id(), "probe not sent");
            }
            if connection.is_disconnected() {
                self.evict(connection).await;
                continue;
            }
            match connection.receive() {
                Some(packet) => {
                    progressed += 1;
                    self.route(connection, packet, &snapshot).await;
                }
                None => {
                    // receive() consumes the close marker
                    if connection.is_disconnected() {
                        self.evict(connection).await;
                    } else if connection.has_pending() {
                        // a dropped frame already consumed the wake for these
                        progressed += 1;
                    }
                }
            }
        }
        progressed
    }

    async fn evict(&self, connection: &Arc<Connection>) {
        let Some(removed) = self.registry.remove(connection.id()) else {
            return;
        };
        let reason = removed
            .disconnect_reason()
            .unwrap_or(DisconnectReason::Disconnected);
        let _ = removed.disconnect().await;

        counter!(CONNECTIONS_REMOVED_TOTAL, "reason" => reason.as_str()).increment(1);
        #[allow(clippy::cast_precision_loss)]
        gauge!(CONNECTIONS_ACTIVE).set(self.registry.len() as f64);
        info!(conn_id = %removed.id(), peer = %removed.peer_addr(), %reason, "connection removed");
        self.events.publish(RouterEvent::ConnectionRemoved {
            id: removed.id().clone(),
            peer: removed.peer_addr(),
            reason,
        });
    }

    async fn route(&self, sender: &Arc<Connection>, packet: Packet, snapshot: &[Arc<Connection>]) {
        let from = sender.id();
        counter!(PACKETS_ROUTED_TOTAL, "kind" => packet.kind().as_str()).increment(1);
        trace!(conn_id = %from, packet = %packet.kind(), "packet received");
        self.events.publish(RouterEvent::PacketReceived {
            from: from.clone(),
            packet: packet.clone(),
        });

        match packet {
            Packet::Heartbeat => {
                if !sender.send(&Packet::Heartbeat).await {
                    report_send_failure(Some(from), from, &self.events);
                }
            }
            Packet::Envelope { target, payload } => {
                let Some(recipient) = self.registry.lookup(&target) else {
                    counter!(UNICAST_DROPS_TOTAL).increment(1);
                    debug!(conn_id = %from, target_id = %target, "envelope target not registered, dropped");
                    return;
                };
                let payload = *payload;
                self.events.publish(RouterEvent::PersonalPacketReceived {
                    from: from.clone(),
                    target: target.clone(),
                    payload: payload.clone(),
                });
                if recipient.send(&payload).await {
                    self.events.publish(RouterEvent::PersonalPacketSent {
                        from: from.clone(),
                        to: target,
                    });
                } else {
                    report_send_failure(Some(from), &target, &self.events);
                }
            }
            other => {
                let _ = deliver_to_all(snapshot, &other, Some(from), &self.events).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chatter_core::wire::encode_frame;
    use chatter_core::{ChatMessage, Presence};
    use chatter_net::testing::receive_within;
    use chatter_net::{ConnectOptions, ConnectionConfig};
    use tokio::io::AsyncWriteExt;
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::broadcast;

    use super::*;

    const WAIT: Duration = Duration::from_secs(2);

    /// A registry of server-side connections, each paired with the client end
    /// and its wake handle.
    struct Harness {
        registry: Arc<Registry>,
        wake: Arc<Notify>,
        events: EventSink,
        listener: TcpListener,
        server_config: ConnectionConfig,
        clients: Vec<(Connection, Arc<Notify>)>,
    }

    impl Harness {
        async fn new(n: usize, server_config: ConnectionConfig) -> Self {
            let (events, _) = broadcast::channel(256);
            let mut h = Self {
                registry: Arc::new(Registry::new()),
                wake: Arc::new(Notify::new()),
                events: EventSink::new(events),
                listener: TcpListener::bind("127.0.0.1:0").await.unwrap(),
                server_config,
                clients: Vec::new(),
            };
            for _ in 0..n {
                let client = h.connect().await;
                h.clients.push(client);
            }
            h
        }

        /// Open one more client and register its server end.
        async fn connect(&self) -> (Connection, Arc<Notify>) {
            let client_wake = Arc::new(Notify::new());
            let options = ConnectOptions::default();
            let port = self.listener.local_addr().unwrap().port();
            let connect = Connection::connect(
                "127.0.0.1",
                port,
                &options,
                ConnectionConfig::client(),
                Arc::clone(&client_wake),
            );
            let (client, server) = tokio::join!(connect, self.accept());
            assert!(self.registry.add(Arc::new(server)));
            (client.unwrap(), client_wake)
        }

        /// Register the server end of a peer that writes raw bytes.
        async fn connect_raw(&self) -> TcpStream {
            let addr = self.listener.local_addr().unwrap();
            let (stream, server) = tokio::join!(TcpStream::connect(addr), self.accept());
            assert!(self.registry.add(Arc::new(server)));
            stream.unwrap()
        }

        async fn accept(&self) -> Connection {
            let (stream, _) = self.listener.accept().await.unwrap();
            Connection::accept(
                stream,
                ConnectionId::generate(),
                self.server_config,
                Arc::clone(&self.wake),
            )
            .await
            .unwrap()
        }

        fn router(&self) -> Router {
            Router::new(
                Arc::clone(&self.registry),
                Arc::clone(&self.wake),
                self.events.clone(),
                Duration::from_millis(20),
            )
        }

        async fn recv(&self, i: usize) -> Option<Packet> {
            let (client, wake) = &self.clients[i];
            receive_within(client, wake, WAIT).await
        }

        async fn silent(&self, i: usize) -> bool {
            let (client, wake) = &self.clients[i];
            receive_within(client, wake, Duration::from_millis(150)).await.is_none()
        }
    }

    fn spawn(router: Router) -> (CancellationToken, tokio::task::JoinHandle<()>) {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(router.run(cancel.clone()));
        (cancel, handle)
    }

    #[tokio::test]
    async fn broadcast_reaches_every_connection_including_sender() {
        let h = Harness::new(3, ConnectionConfig::server()).await;
        let (cancel, handle) = spawn(h.router());

        let msg = Packet::Chat(ChatMessage::new("alice", "hi", "red"));
        assert!(h.clients[0].0.send(&msg).await);
        for i in 0..3 {
            assert_eq!(h.recv(i).await, Some(msg.clone()), "client {i}");
        }

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn heartbeat_is_echoed_to_sender_only() {
        let h = Harness::new(2, ConnectionConfig::server()).await;
        let (cancel, handle) = spawn(h.router());

        assert!(h.clients[0].0.probe_liveness().await);
        assert_eq!(h.recv(0).await, Some(Packet::Heartbeat));
        assert!(h.silent(1).await);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn envelope_reaches_only_its_target() {
        let h = Harness::new(3, ConnectionConfig::server()).await;
        let mut events = h.events.subscribe();
        let (cancel, handle) = spawn(h.router());

        let target = h.clients[2].0.id().clone();
        let inner = Packet::Chat(ChatMessage::new("alice", "psst", "red"));
        let envelope = Packet::envelope(target.clone(), inner.clone());
        assert!(h.clients[0].0.send(&envelope).await);

        assert_eq!(h.recv(2).await, Some(inner.clone()));
        assert!(h.silent(0).await);
        assert!(h.silent(1).await);

        let mut saw_received = false;
        let mut saw_sent = false;
        while let Ok(event) = events.try_recv() {
            match event {
                RouterEvent::PersonalPacketReceived { target: t, payload, .. } => {
                    assert_eq!(t, target);
                    assert_eq!(payload, inner);
                    saw_received = true;
                }
                RouterEvent::PersonalPacketSent { to, .. } => {
                    assert_eq!(to, target);
                    saw_sent = true;
                }
                _ => {}
            }
        }
        assert!(saw_received && saw_sent);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn envelope_to_unknown_target_is_dropped_silently() {
        let h = Harness::new(2, ConnectionConfig::server()).await;
        let mut events = h.events.subscribe();
        let (cancel, handle) = spawn(h.router());

        let envelope = Packet::envelope(
            ConnectionId::from("nobody"),
            Packet::Chat(ChatMessage::new("a", "b", "c")),
        );
        assert!(h.clients[0].0.send(&envelope).await);
        assert!(h.silent(0).await);
        assert!(h.silent(1).await);

        while let Ok(event) = events.try_recv() {
            assert!(!matches!(
                event,
                RouterEvent::PersonalPacketReceived { .. }
                    | RouterEvent::PersonalPacketSent { .. }
                    | RouterEvent::SendFailed { .. }
            ));
        }
        // the sender is still registered
        assert_eq!(h.registry.len(), 2);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn presence_broadcast_carries_roster_unchanged() {
        let h = Harness::new(2, ConnectionConfig::server()).await;
        let (cancel, handle) = spawn(h.router());

        let presence = Packet::Presence(Presence {
            username: "bob".into(),
            identity: h.clients[1].0.id().clone(),
            joining: true,
            roster: vec!["alice".into(), "bob".into()],
        });
        assert!(h.clients[1].0.send(&presence).await);
        assert_eq!(h.recv(0).await, Some(presence.clone()));
        assert_eq!(h.recv(1).await, Some(presence));

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn closed_peer_is_removed_exactly_once() {
        let mut h = Harness::new(2, ConnectionConfig::server()).await;
        let mut events = h.events.subscribe();
        let (cancel, handle) = spawn(h.router());

        let (gone, _) = h.clients.remove(0);
        let gone_id = gone.id().clone();
        assert!(gone.disconnect().await);

        let removed = tokio::time::timeout(WAIT, async {
            loop {
                if let Ok(RouterEvent::ConnectionRemoved { id, reason, .. }) = events.recv().await {
                    return (id, reason);
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(removed.0, gone_id);
        assert_eq!(removed.1, DisconnectReason::PeerClosed);
        assert_eq!(h.registry.len(), 1);

        // a further sweep does not report it again
        tokio::time::sleep(Duration::from_millis(100)).await;
        while let Ok(event) = events.try_recv() {
            assert!(!matches!(event, RouterEvent::ConnectionRemoved { .. }));
        }

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn silent_connection_expires_after_idle_plus_grace() {
        let fast = ConnectionConfig::server()
            .with_timings(Duration::from_millis(80), Duration::from_millis(80));
        let h = Harness::new(1, fast).await;
        let mut events = h.events.subscribe();
        let started = tokio::time::Instant::now();
        let (cancel, handle) = spawn(h.router());

        let reason = tokio::time::timeout(WAIT, async {
            loop {
                if let Ok(RouterEvent::ConnectionRemoved { reason, .. }) = events.recv().await {
                    return reason;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(reason, DisconnectReason::LivenessTimeout);
        assert!(started.elapsed() >= Duration::from_millis(140));
        assert!(h.registry.is_empty());

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn heartbeats_keep_a_connection_registered() {
        let fast = ConnectionConfig::server()
            .with_timings(Duration::from_millis(80), Duration::from_millis(80));
        let h = Harness::new(1, fast).await;
        let (cancel, handle) = spawn(h.router());

        for _ in 0..8 {
            tokio::time::sleep(Duration::from_millis(40)).await;
            assert!(h.clients[0].0.probe_liveness().await);
        }
        assert_eq!(h.registry.len(), 1);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn snapshot_excludes_connections_removed_before_dispatch() {
        let h = Harness::new(3, ConnectionConfig::server()).await;
        let removed_id = h.clients[2].0.id().clone();
        let _ = h.registry.remove(&removed_id);

        let (cancel, handle) = spawn(h.router());
        let msg = Packet::Chat(ChatMessage::new("a", "b", "c"));
        assert!(h.clients[0].0.send(&msg).await);
        assert_eq!(h.recv(0).await, Some(msg.clone()));
        assert_eq!(h.recv(1).await, Some(msg));
        assert!(h.silent(2).await);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn snapshot_excludes_connections_added_after_it_was_taken() {
        let mut h = Harness::new(2, ConnectionConfig::server()).await;
        let snapshot = h.registry.snapshot();
        let late = h.connect().await;
        h.clients.push(late);
        assert_eq!(h.registry.len(), 3);

        let msg = Packet::Chat(ChatMessage::new("relay", "before you", "purple"));
        let delivered = deliver_to_all(&snapshot, &msg, None, &h.events).await;
        assert_eq!(delivered, 2);
        assert_eq!(h.recv(0).await, Some(msg.clone()));
        assert_eq!(h.recv(1).await, Some(msg));
        assert!(h.silent(2).await);
    }

    #[tokio::test]
    async fn send_failure_does_not_abort_broadcast() {
        let h = Harness::new(3, ConnectionConfig::server()).await;
        let mut events = h.events.subscribe();
        // the middle recipient's server end is closed locally; writes to it fail
        let broken = h.registry.snapshot()[1].clone();
        let _ = broken.disconnect().await;

        let snapshot = h.registry.snapshot();
        let msg = Packet::Chat(ChatMessage::new("relay", "notice", "purple"));
        let delivered = deliver_to_all(&snapshot, &msg, None, &h.events).await;
        assert_eq!(delivered, 2);
        assert_eq!(h.recv(0).await, Some(msg.clone()));
        assert_eq!(h.recv(2).await, Some(msg));

        let mut failed = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let RouterEvent::SendFailed { to, .. } = event {
                failed.push(to);
            }
        }
        assert_eq!(failed, vec![broken.id().clone()]);
    }

    #[tokio::test]
    async fn tick_routes_one_packet_per_connection() {
        let h = Harness::new(1, ConnectionConfig::server()).await;
        let router = h.router();
        for i in 0..3 {
            let msg = Packet::Chat(ChatMessage::new("a", i.to_string(), "c"));
            assert!(h.clients[0].0.send(&msg).await);
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(router.tick().await, 1);
        assert_eq!(router.tick().await, 1);
        assert_eq!(router.tick().await, 1);
        assert_eq!(router.tick().await, 0);
    }

    #[tokio::test]
    async fn undecodable_frame_does_not_stall_the_frames_behind_it() {
        let h = Harness::new(1, ConnectionConfig::server()).await;
        let mut raw = h.connect_raw().await;
        let msg = Packet::Chat(ChatMessage::new("raw", "after garbage", "red"));
        let mut bytes = vec![0, 0, 0, 1, 0x09];
        bytes.extend_from_slice(&encode_frame(&msg));
        raw.write_all(&bytes).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let router = h.router();
        // the garbage frame is dropped but still counts as progress
        assert_eq!(router.tick().await, 1);
        assert_eq!(router.tick().await, 1);
        assert_eq!(h.recv(0).await, Some(msg));
        assert_eq!(router.tick().await, 0);
        assert_eq!(h.registry.len(), 2);
    }
}
