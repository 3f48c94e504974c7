//! Client configuration.

use std::time::Duration;

use chatter_net::{ConnectOptions, ConnectionConfig};
use chatter_settings::ChatterSettings;

/// Configuration for a [`ChatClient`](crate::ChatClient).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClientConfig {
    /// Connection settings; liveness is always probing.
    pub connection: ConnectionConfig,
    /// Connect and handshake bounds.
    pub options: ConnectOptions,
    /// How often the heartbeat timer polls liveness.
    pub check_interval: Duration,
}

impl ClientConfig {
    /// Build from loaded settings.
    pub fn from_settings(settings: &ChatterSettings) -> Self {
        let heartbeat = &settings.heartbeat;
        Self {
            connection: ConnectionConfig::client()
                .with_timings(heartbeat.idle_timeout(), heartbeat.grace()),
            options: ConnectOptions {
                connect_timeout: Duration::from_millis(settings.client.connect_timeout_ms),
                handshake_timeout: Duration::from_millis(settings.client.handshake_timeout_ms),
            },
            check_interval: heartbeat.check_interval(),
        }
    }

    /// Replace the heartbeat timings.
    #[must_use]
    pub fn with_timings(mut self, idle_timeout: Duration, grace: Duration) -> Self {
        self.connection = self.connection.with_timings(idle_timeout, grace);
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::client(),
            options: ConnectOptions::default(),
            check_interval: Duration::from_millis(250),
        }
    }
}
