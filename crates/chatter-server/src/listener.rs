//! Accept loop.
//!
//! Each accepted socket gets a fresh identity written as the handshake line,
//! is announced as [`RouterEvent::ConnectionAccepted`], then joins the
//! [`Registry`]. Handshake writes run on their own tasks so a
//! slow peer cannot stall the accept loop.

use std::net::SocketAddr;
use std::sync::Arc;

use ::metrics::{counter, gauge};
use chatter_core::ConnectionId;
use chatter_net::{Connection, ConnectionConfig, DisconnectReason};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::ServerError;
use crate::events::{EventSink, RouterEvent};
use crate::metrics::{CONNECTIONS_ACCEPTED_TOTAL, CONNECTIONS_ACTIVE, HANDSHAKE_FAILURES_TOTAL};
use crate::registry::Registry;

/// Bound listening socket plus everything an accepted connection needs.
pub struct Listener {
    listener: TcpListener,
    registry: Arc<Registry>,
    events: EventSink,
    config: ConnectionConfig,
    wake: Arc<Notify>,
}

impl Listener {
    /// Bind `host:port` (port `0` auto-assigns).
    ///
    /// `wake` is handed to every accepted connection so the router hears
    /// about new packets.
    pub async fn bind(
        host: &str,
        port: u16,
        registry: Arc<Registry>,
        events: EventSink,
        config: ConnectionConfig,
        wake: Arc<Notify>,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind((host, port))
            .await
            .map_err(|source| ServerError::Bind {
                addr: format!("{host}:{port}"),
                source,
            })?;
        Ok(Self {
            listener,
            registry,
            events,
            config,
            wake,
        })
    }

    /// Address actually bound.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept until `cancel` fires. Accept errors are logged and the loop
    /// continues; in-flight handshakes are aborted on exit.
    pub async fn run(self, cancel: CancellationToken) {
        let mut handshakes = JoinSet::new();
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(%peer, "socket accepted");
                        let _ = handshakes.spawn(admit(
                            stream,
                            peer,
                            Arc::clone(&self.registry),
                            self.events.clone(),
                            self.config,
                            Arc::clone(&self.wake),
                        ));
                    }
                    Err(err) => warn!(error = %err, "accept failed"),
                },
                Some(_) = handshakes.join_next(), if !handshakes.is_empty() => {}
            }
        }
        handshakes.shutdown().await;
        debug!("listener stopped");
    }
}

async fn admit(
    stream: TcpStream,
    peer: SocketAddr,
    registry: Arc<Registry>,
    events: EventSink,
    config: ConnectionConfig,
    wake: Arc<Notify>,
) {
    let id = ConnectionId::generate();
    let connection = match Connection::accept(stream, id.clone(), config, wake).await {
        Ok(connection) => Arc::new(connection),
        Err(err) => {
            counter!(HANDSHAKE_FAILURES_TOTAL).increment(1);
            warn!(%peer, error = %err, "identity write failed, dropping socket");
            return;
        }
    };

    // sent before registration; nothing the router reports may precede it
    events.publish(RouterEvent::ConnectionAccepted {
        id: id.clone(),
        peer,
    });
    if !registry.add(Arc::clone(&connection)) {
        warn!(conn_id = %id, %peer, "identity already registered, dropping socket");
        let _ = connection.disconnect().await;
        events.publish(RouterEvent::ConnectionRemoved {
            id,
            peer,
            reason: DisconnectReason::Disconnected,
        });
        return;
    }

    counter!(CONNECTIONS_ACCEPTED_TOTAL).increment(1);
    #[allow(clippy::cast_precision_loss)]
    gauge!(CONNECTIONS_ACTIVE).set(registry.len() as f64);
    info!(conn_id = %id, %peer, "connection accepted");
}
