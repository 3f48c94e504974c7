//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]` so a settings
//! file may be partial: missing fields keep their default value.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root settings type.
///
/// ```json
/// {
///   "server": { "port": 9000 },
///   "heartbeat": { "idleTimeoutMs": 3000 }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatterSettings {
    /// Relay listener and dispatch settings.
    pub server: ServerSettings,
    /// Client connect settings.
    pub client: ClientSettings,
    /// Liveness timings shared by both sides.
    pub heartbeat: HeartbeatSettings,
    /// Log output settings.
    pub logging: LoggingSettings,
}

/// Relay listener and dispatch settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listen port (`0` auto-assigns).
    pub port: u16,
    /// Upper bound between two dispatch sweeps when no packet wakes the router.
    pub sweep_interval_ms: u64,
    /// Bound on a single socket write.
    pub write_timeout_ms: u64,
    /// Largest accepted frame body in bytes.
    pub max_frame_bytes: usize,
    /// Capacity of the event broadcast channels.
    pub event_capacity: usize,
    /// How long `stop` waits for tasks before aborting them.
    pub shutdown_timeout_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            sweep_interval_ms: 250,
            write_timeout_ms: 5_000,
            max_frame_bytes: chatter_core::constants::MAX_FRAME_BYTES,
            event_capacity: 1024,
            shutdown_timeout_ms: 5_000,
        }
    }
}

/// Client connect settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientSettings {
    /// Relay host to connect to.
    pub host: String,
    /// Relay port to connect to.
    pub port: u16,
    /// Bound on the TCP connect.
    pub connect_timeout_ms: u64,
    /// Bound on reading the identity line.
    pub handshake_timeout_ms: u64,
    /// Color tag used when none is given.
    pub default_color: String,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            connect_timeout_ms: 5_000,
            handshake_timeout_ms: millis(chatter_core::constants::HANDSHAKE_TIMEOUT),
            default_color: "black".to_string(),
        }
    }
}

/// Liveness timings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HeartbeatSettings {
    /// Quiet period before a probe.
    pub idle_timeout_ms: u64,
    /// Window for the probe reply.
    pub grace_ms: u64,
    /// How often the client heartbeat timer checks its state.
    pub check_interval_ms: u64,
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            idle_timeout_ms: millis(chatter_core::constants::IDLE_TIMEOUT),
            grace_ms: millis(chatter_core::constants::HEARTBEAT_GRACE),
            check_interval_ms: 250,
        }
    }
}

impl HeartbeatSettings {
    /// Idle timeout as a [`Duration`].
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    /// Grace window as a [`Duration`].
    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.grace_ms)
    }

    /// Check interval as a [`Duration`].
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }
}

/// Log output settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default `EnvFilter` directive (`RUST_LOG` wins when set).
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// Protocol constants are whole seconds; they fit comfortably in u64 millis.
#[allow(clippy::cast_possible_truncation)]
fn millis(d: Duration) -> u64 {
    d.as_millis() as u64
}
