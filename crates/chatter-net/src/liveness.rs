//! Heartbeat liveness state machine.
//!
//! ```text
//! Connecting → Handshaking → Active ⇄ AwaitingHeartbeatAck
//!                                         │
//!            (any) ──────────────────────→ Disconnected
//! ```
//!
//! [`Liveness`] is pure: every transition takes the current instant as an
//! argument, so the owning [`Connection`](crate::Connection) and the tests
//! decide where time comes from.

use std::fmt;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::{LivenessConfig, ProbeMode};

/// Connection lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// TCP connect in progress.
    Connecting,
    /// Waiting for (or writing) the identity line.
    Handshaking,
    /// Established and recently active.
    Active,
    /// Idle past the timeout; a heartbeat reply is due within the grace window.
    AwaitingHeartbeatAck,
    /// Terminal.
    Disconnected,
}

impl ConnectionState {
    /// Lowercase name for logs and metric labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Handshaking => "handshaking",
            Self::Active => "active",
            Self::AwaitingHeartbeatAck => "awaiting_heartbeat_ack",
            Self::Disconnected => "disconnected",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a connection reached `Disconnected`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DisconnectReason {
    /// The heartbeat grace window elapsed with no reply.
    LivenessTimeout,
    /// End of stream or a framing error from the peer.
    PeerClosed,
    /// `disconnect()` was called locally.
    Disconnected,
}

impl DisconnectReason {
    /// Lowercase name for logs and metric labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LivenessTimeout => "liveness_timeout",
            Self::PeerClosed => "peer_closed",
            Self::Disconnected => "disconnected",
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the owner should do after [`Liveness::poll`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LivenessAction {
    /// Nothing due.
    None,
    /// Idle timeout reached on the probing side: send a `Heartbeat`.
    SendProbe,
    /// Grace window elapsed; the state is now `Disconnected`. Returned once.
    Expired,
}

/// Liveness bookkeeping for one connection.
#[derive(Debug)]
pub struct Liveness {
    state: ConnectionState,
    mode: ProbeMode,
    idle_timeout: Duration,
    grace: Duration,
    last_activity: Instant,
    probe_started: Option<Instant>,
    reason: Option<DisconnectReason>,
}

impl Liveness {
    /// A fresh machine in `Connecting`.
    pub fn new(config: &LivenessConfig, now: Instant) -> Self {
        Self {
            state: ConnectionState::Connecting,
            mode: config.mode,
            idle_timeout: config.idle_timeout,
            grace: config.grace,
            last_activity: now,
            probe_started: None,
            reason: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Why the machine reached `Disconnected`, if it has.
    pub fn reason(&self) -> Option<DisconnectReason> {
        self.reason
    }

    /// Last instant that counted as activity.
    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    /// Whether a heartbeat reply is outstanding.
    pub fn awaiting_ack(&self) -> bool {
        self.probe_started.is_some()
    }

    /// `Connecting → Handshaking` once the socket exists.
    pub fn begin_handshake(&mut self) {
        if self.state == ConnectionState::Connecting {
            self.state = ConnectionState::Handshaking;
        }
    }

    /// `Handshaking → Active` once the identity has been exchanged.
    pub fn activate(&mut self, now: Instant) {
        if self.state == ConnectionState::Handshaking {
            self.state = ConnectionState::Active;
            self.last_activity = now;
        }
    }

    /// Record an inbound packet.
    ///
    /// A passive machine counts every packet; a probing machine counts only
    /// heartbeats, so it keeps probing while chat traffic flows.
    pub fn observe(&mut self, is_heartbeat: bool, now: Instant) {
        if !matches!(
            self.state,
            ConnectionState::Active | ConnectionState::AwaitingHeartbeatAck
        ) {
            return;
        }
        if self.mode == ProbeMode::Probing && !is_heartbeat {
            return;
        }
        self.last_activity = now;
        self.probe_started = None;
        self.state = ConnectionState::Active;
    }

    /// Advance timers.
    pub fn poll(&mut self, now: Instant) -> LivenessAction {
        match self.state {
            ConnectionState::Active => {
                if now.saturating_duration_since(self.last_activity) < self.idle_timeout {
                    return LivenessAction::None;
                }
                self.state = ConnectionState::AwaitingHeartbeatAck;
                self.probe_started = Some(now);
                match self.mode {
                    ProbeMode::Probing => LivenessAction::SendProbe,
                    ProbeMode::Passive => LivenessAction::None,
                }
            }
            ConnectionState::AwaitingHeartbeatAck => {
                let started = self.probe_started.unwrap_or(self.last_activity);
                if now.saturating_duration_since(started) < self.grace {
                    return LivenessAction::None;
                }
                let _ = self.disconnect(DisconnectReason::LivenessTimeout);
                LivenessAction::Expired
            }
            _ => LivenessAction::None,
        }
    }

    /// Move to `Disconnected`. Returns `false` if already there.
    pub fn disconnect(&mut self, reason: DisconnectReason) -> bool {
        if self.state == ConnectionState::Disconnected {
            return false;
        }
        self.state = ConnectionState::Disconnected;
        self.reason = Some(reason);
        self.probe_started = None;
        true
    }
}
