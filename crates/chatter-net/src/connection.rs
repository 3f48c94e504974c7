//! A single TCP endpoint.
//!
//! Each [`Connection`] owns its socket halves. A reader task drains
//! length-prefixed frames into a bounded inbox and pokes a shared [`Notify`];
//! [`Connection::receive`] pops that inbox without waiting. Writes go through
//! the connection's own writer lock, one frame at a time, bounded by the
//! configured write timeout.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use chatter_core::{ConnectionId, Packet, decode_packet, encode_packet, frame_codec};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex as AsyncMutex, Notify, mpsc};
use tokio::time::Instant;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::{ConnectOptions, ConnectionConfig};
use crate::errors::ConnectError;
use crate::handshake;
use crate::liveness::{ConnectionState, DisconnectReason, Liveness, LivenessAction};

type FrameReader = FramedRead<OwnedReadHalf, LengthDelimitedCodec>;
type FrameWriter = FramedWrite<OwnedWriteHalf, LengthDelimitedCodec>;

enum Inbound {
    Frame(Bytes),
    Closed,
}

/// One live logical channel bound to one socket and one identity.
pub struct Connection {
    id: ConnectionId,
    peer: SocketAddr,
    connected_at: Instant,
    liveness: Mutex<Liveness>,
    inbox: Mutex<mpsc::Receiver<Inbound>>,
    writer: AsyncMutex<FrameWriter>,
    write_timeout: Duration,
    reader_cancel: CancellationToken,
    released: AtomicBool,
}

impl Connection {
    /// Server side: write `id` as the handshake line and start reading frames.
    ///
    /// A failed identity write drops the socket; nothing is started.
    pub async fn accept(
        stream: TcpStream,
        id: ConnectionId,
        config: ConnectionConfig,
        wake: Arc<Notify>,
    ) -> std::io::Result<Self> {
        let peer = stream.peer_addr()?;
        let mut liveness = Liveness::new(&config.liveness, Instant::now());
        liveness.begin_handshake();

        let _ = stream.set_nodelay(true);
        let (read, mut write) = stream.into_split();
        handshake::write_identity(&mut write, &id, config.write_timeout).await?;
        liveness.activate(Instant::now());

        let frames = FramedRead::new(read, frame_codec(config.max_frame_bytes));
        Ok(Self::start(id, peer, liveness, frames, write, &config, wake))
    }

    /// Client side: connect, read the identity line, start reading frames.
    ///
    /// Each phase is bounded by `options`; there is no retry.
    pub async fn connect(
        host: &str,
        port: u16,
        options: &ConnectOptions,
        config: ConnectionConfig,
        wake: Arc<Notify>,
    ) -> Result<Self, ConnectError> {
        let addr = format!("{host}:{port}");
        let mut liveness = Liveness::new(&config.liveness, Instant::now());

        let stream =
            match tokio::time::timeout(options.connect_timeout, TcpStream::connect((host, port)))
                .await
            {
                Err(_) => {
                    return Err(ConnectError::Timeout {
                        addr,
                        timeout: options.connect_timeout,
                    });
                }
                Ok(Err(source)) => return Err(ConnectError::Refused { addr, source }),
                Ok(Ok(stream)) => stream,
            };
        liveness.begin_handshake();

        let peer = stream.peer_addr()?;
        let _ = stream.set_nodelay(true);
        let (read, write) = stream.into_split();
        let mut lines = FramedRead::new(read, handshake::line_codec());
        let id = handshake::read_identity(&mut lines, options.handshake_timeout).await?;
        liveness.activate(Instant::now());
        debug!(conn_id = %id, %peer, "identity received");

        let max_frame_bytes = config.max_frame_bytes;
        let frames = lines.map_decoder(|_| frame_codec(max_frame_bytes));
        Ok(Self::start(id, peer, liveness, frames, write, &config, wake))
    }

    fn start(
        id: ConnectionId,
        peer: SocketAddr,
        liveness: Liveness,
        frames: FrameReader,
        write: OwnedWriteHalf,
        config: &ConnectionConfig,
        wake: Arc<Notify>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(config.inbox_capacity.max(1));
        let reader_cancel = CancellationToken::new();
        drop(tokio::spawn(read_frames(
            id.clone(),
            frames,
            tx,
            wake,
            reader_cancel.clone(),
        )));

        Self {
            id,
            peer,
            connected_at: Instant::now(),
            liveness: Mutex::new(liveness),
            inbox: Mutex::new(rx),
            writer: AsyncMutex::new(FramedWrite::new(write, frame_codec(config.max_frame_bytes))),
            write_timeout: config.write_timeout,
            reader_cancel,
            released: AtomicBool::new(false),
        }
    }

    /// Identity assigned by the relay.
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Remote socket address.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Current liveness state.
    pub fn state(&self) -> ConnectionState {
        self.liveness.lock().state()
    }

    /// Whether the connection has reached `Disconnected`.
    pub fn is_disconnected(&self) -> bool {
        self.state() == ConnectionState::Disconnected
    }

    /// Why the connection disconnected, if it has.
    pub fn disconnect_reason(&self) -> Option<DisconnectReason> {
        self.liveness.lock().reason()
    }

    /// Time since the handshake completed.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Time since the last packet that counted as activity.
    pub fn idle_for(&self) -> Duration {
        self.liveness.lock().last_activity().elapsed()
    }

    /// Serialize `packet` and write it as one frame.
    ///
    /// Returns `false` on I/O failure, on write timeout, or once disconnected.
    /// A failed send does not change the liveness state.
    pub async fn send(&self, packet: &Packet) -> bool {
        if self.is_disconnected() {
            return false;
        }
        let body = encode_packet(packet);
        let mut writer = self.writer.lock().await;
        match tokio::time::timeout(self.write_timeout, writer.send(body)).await {
            Ok(Ok(())) => true,
            Ok(Err(err)) => {
                debug!(conn_id = %self.id, error = %err, "send failed");
                false
            }
            Err(_) => {
                warn!(conn_id = %self.id, timeout = ?self.write_timeout, "send timed out");
                false
            }
        }
    }

    /// Pop one packet if one is ready. Never waits.
    ///
    /// An undecodable frame yields `None` and is logged. The end of the
    /// peer's stream moves the connection to `Disconnected`.
    pub fn receive(&self) -> Option<Packet> {
        if self.is_disconnected() {
            return None;
        }
        let inbound = self.inbox.lock().try_recv().ok()?;
        match inbound {
            Inbound::Frame(body) => match decode_packet(body) {
                Ok(packet) => {
                    self.liveness
                        .lock()
                        .observe(packet.is_heartbeat(), Instant::now());
                    Some(packet)
                }
                Err(err) => {
                    warn!(conn_id = %self.id, error = %err, "dropping undecodable packet");
                    None
                }
            },
            Inbound::Closed => {
                if self.liveness.lock().disconnect(DisconnectReason::PeerClosed) {
                    debug!(conn_id = %self.id, "peer closed");
                }
                None
            }
        }
    }

    /// Whether frames are queued behind the last [`receive`](Self::receive).
    ///
    /// `receive` returning `None` while this is `true` means a frame was
    /// dropped and more are waiting.
    pub fn has_pending(&self) -> bool {
        !self.inbox.lock().is_empty()
    }

    /// Send a `Heartbeat` and report whether the write succeeded.
    pub async fn probe_liveness(&self) -> bool {
        self.send(&Packet::Heartbeat).await
    }

    /// Advance the liveness timers against the current time.
    pub fn poll_liveness(&self) -> LivenessAction {
        let action = self.liveness.lock().poll(Instant::now());
        if action == LivenessAction::Expired {
            debug!(conn_id = %self.id, "heartbeat grace elapsed");
        }
        action
    }

    /// Close the socket. Idempotent: returns `true` only for the call that
    /// released it.
    pub async fn disconnect(&self) -> bool {
        let _ = self
            .liveness
            .lock()
            .disconnect(DisconnectReason::Disconnected);
        if self.released.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.reader_cancel.cancel();
        let mut writer = self.writer.lock().await;
        let close = SinkExt::<Bytes>::close(&mut *writer);
        let _ = tokio::time::timeout(self.write_timeout, close).await;
        debug!(conn_id = %self.id, peer = %self.peer, "connection closed");
        true
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader_cancel.cancel();
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

async fn read_frames(
    id: ConnectionId,
    mut frames: FrameReader,
    inbox: mpsc::Sender<Inbound>,
    wake: Arc<Notify>,
    cancel: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            () = cancel.cancelled() => return,
            next = frames.next() => next,
        };
        let inbound = match next {
            Some(Ok(frame)) => Inbound::Frame(frame.freeze()),
            Some(Err(err)) => {
                warn!(conn_id = %id, error = %err, "framing error, closing");
                Inbound::Closed
            }
            None => Inbound::Closed,
        };
        let closed = matches!(inbound, Inbound::Closed);
        tokio::select! {
            () = cancel.cancelled() => return,
            sent = inbox.send(inbound) => {
                if sent.is_err() {
                    return;
                }
            }
        }
        wake.notify_one();
        if closed {
            return;
        }
    }
}
