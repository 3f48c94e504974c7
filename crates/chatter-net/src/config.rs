//! Per-connection configuration.

use std::time::Duration;

use chatter_core::constants::{
    HANDSHAKE_TIMEOUT, HEARTBEAT_GRACE, IDLE_TIMEOUT, MAX_FRAME_BYTES,
};

/// Which side of a link sends heartbeat probes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProbeMode {
    /// Sends a `Heartbeat` when idle; only a `Heartbeat` reply counts as activity.
    Probing,
    /// Never probes; any inbound packet counts as activity.
    Passive,
}

/// Liveness timings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LivenessConfig {
    /// Quiet period before entering `AwaitingHeartbeatAck`.
    pub idle_timeout: Duration,
    /// Window for the heartbeat reply.
    pub grace: Duration,
    /// Probing or passive.
    pub mode: ProbeMode,
}

impl LivenessConfig {
    /// Client-side timings: probe after `idle_timeout`.
    pub fn probing(idle_timeout: Duration, grace: Duration) -> Self {
        Self {
            idle_timeout,
            grace,
            mode: ProbeMode::Probing,
        }
    }

    /// Server-side timings: wait for the peer's own heartbeat.
    pub fn passive(idle_timeout: Duration, grace: Duration) -> Self {
        Self {
            idle_timeout,
            grace,
            mode: ProbeMode::Passive,
        }
    }
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self::passive(IDLE_TIMEOUT, HEARTBEAT_GRACE)
    }
}

/// Everything a [`Connection`](crate::Connection) needs once the socket exists.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Heartbeat timings and mode.
    pub liveness: LivenessConfig,
    /// Bound on a single write.
    pub write_timeout: Duration,
    /// Largest frame body accepted from the peer.
    pub max_frame_bytes: usize,
    /// Frames buffered between the reader task and `receive()`.
    pub inbox_capacity: usize,
}

impl ConnectionConfig {
    /// Defaults for the connecting side.
    pub fn client() -> Self {
        Self {
            liveness: LivenessConfig::probing(IDLE_TIMEOUT, HEARTBEAT_GRACE),
            ..Self::default()
        }
    }

    /// Defaults for the accepting side.
    pub fn server() -> Self {
        Self::default()
    }

    /// Replace the liveness timings, keeping the mode.
    #[must_use]
    pub fn with_timings(mut self, idle_timeout: Duration, grace: Duration) -> Self {
        self.liveness.idle_timeout = idle_timeout;
        self.liveness.grace = grace;
        self
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            liveness: LivenessConfig::default(),
            write_timeout: Duration::from_secs(5),
            max_frame_bytes: MAX_FRAME_BYTES,
            inbox_capacity: 256,
        }
    }
}

/// Bounds on establishing an outbound connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Bound on the TCP connect.
    pub connect_timeout: Duration,
    /// Bound on reading the identity line.
    pub handshake_timeout: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            handshake_timeout: HANDSHAKE_TIMEOUT,
        }
    }
}
