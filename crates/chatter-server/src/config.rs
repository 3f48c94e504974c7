//! Server configuration.

use std::time::Duration;

use chatter_net::{ConnectionConfig, LivenessConfig};
use chatter_settings::ChatterSettings;

/// Configuration for the Chatter relay.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Settings applied to every accepted connection.
    pub connection: ConnectionConfig,
    /// Longest wait between dispatch sweeps when no packet arrives.
    pub sweep_interval: Duration,
    /// Capacity of the router and server event channels.
    pub event_capacity: usize,
    /// How long `stop` waits for tasks before aborting them.
    pub shutdown_timeout: Duration,
}

impl ServerConfig {
    /// Build from loaded settings.
    pub fn from_settings(settings: &ChatterSettings) -> Self {
        let server = &settings.server;
        let heartbeat = &settings.heartbeat;
        Self {
            host: server.host.clone(),
            port: server.port,
            connection: ConnectionConfig {
                liveness: LivenessConfig::passive(heartbeat.idle_timeout(), heartbeat.grace()),
                write_timeout: Duration::from_millis(server.write_timeout_ms),
                max_frame_bytes: server.max_frame_bytes,
                ..ConnectionConfig::server()
            },
            sweep_interval: Duration::from_millis(server.sweep_interval_ms),
            event_capacity: server.event_capacity,
            shutdown_timeout: Duration::from_millis(server.shutdown_timeout_ms),
        }
    }

    /// `host:port` as given.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            connection: ConnectionConfig::server(),
            sweep_interval: Duration::from_millis(250),
            event_capacity: 1024,
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

#[cfg(test)]
mod tests {
    use chatter_net::ProbeMode;

    use super::*;

    #[test]
    fn default_binds_loopback_auto_port() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.port, 0);
        assert_eq!(cfg.bind_addr(), "127.0.0.1:0");
    }

    #[test]
    fn default_connections_are_passive() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.connection.liveness.mode, ProbeMode::Passive);
    }

    #[test]
    fn from_settings_carries_timings() {
        let mut settings = ChatterSettings::default();
        settings.server.port = 9001;
        settings.heartbeat.idle_timeout_ms = 1200;
        settings.heartbeat.grace_ms = 800;
        settings.server.sweep_interval_ms = 40;

        let cfg = ServerConfig::from_settings(&settings);
        assert_eq!(cfg.port, 9001);
        assert_eq!(cfg.host, "0.0.0.0");
        assert_eq!(cfg.connection.liveness.idle_timeout, Duration::from_millis(1200));
        assert_eq!(cfg.connection.liveness.grace, Duration::from_millis(800));
        assert_eq!(cfg.connection.liveness.mode, ProbeMode::Passive);
        assert_eq!(cfg.sweep_interval, Duration::from_millis(40));
    }
}
