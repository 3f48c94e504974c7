//! Loopback helpers for tests in this and downstream crates.

use std::sync::Arc;
use std::time::Duration;

use chatter_core::{ConnectionId, Packet};
use tokio::net::TcpListener;
use tokio::sync::Notify;

use crate::config::{ConnectOptions, ConnectionConfig};
use crate::connection::Connection;
use crate::errors::ConnectError;

/// Both ends of one loopback link, each with its own wake handle.
pub struct LoopbackPair {
    /// Connecting side.
    pub client: Connection,
    /// Accepting side.
    pub server: Connection,
    /// Notified when the client's inbox gains an entry.
    pub client_wake: Arc<Notify>,
    /// Notified when the server's inbox gains an entry.
    pub server_wake: Arc<Notify>,
}

/// Open a loopback link with the given configs on each end.
pub async fn connection_pair(
    client_config: ConnectionConfig,
    server_config: ConnectionConfig,
) -> Result<LoopbackPair, ConnectError> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let client_wake = Arc::new(Notify::new());
    let server_wake = Arc::new(Notify::new());

    let accept = async {
        let (stream, _) = listener.accept().await?;
        let conn = Connection::accept(
            stream,
            ConnectionId::generate(),
            server_config,
            Arc::clone(&server_wake),
        )
        .await?;
        Ok::<_, ConnectError>(conn)
    };
    let options = ConnectOptions::default();
    let connect = Connection::connect(
        "127.0.0.1",
        addr.port(),
        &options,
        client_config,
        Arc::clone(&client_wake),
    );

    let (server, client) = tokio::try_join!(accept, connect)?;
    Ok(LoopbackPair {
        client,
        server,
        client_wake,
        server_wake,
    })
}

/// Loopback link with default client and server configs.
pub async fn default_pair() -> Result<LoopbackPair, ConnectError> {
    connection_pair(ConnectionConfig::client(), ConnectionConfig::server()).await
}

/// Poll `conn.receive()` until it yields a packet or `within` elapses.
pub async fn receive_within(conn: &Connection, wake: &Notify, within: Duration) -> Option<Packet> {
    let poll = async {
        loop {
            if let Some(packet) = conn.receive() {
                return packet;
            }
            // an undecodable frame consumes a wake without yielding a packet
            tokio::select! {
                () = wake.notified() => {}
                () = tokio::time::sleep(Duration::from_millis(10)) => {}
            }
        }
    };
    tokio::time::timeout(within, poll).await.ok()
}
