//! Prometheus exporter and relay metric names.

use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use tracing::info;

/// Install the global recorder and serve `/metrics` on `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn install_exporter(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    info!(%addr, "prometheus exporter listening");
    Ok(())
}

// Metric name constants to avoid typos across crates.

/// Connections accepted total (counter).
pub const CONNECTIONS_ACCEPTED_TOTAL: &str = "chatter_connections_accepted_total";
/// Connections removed total (counter, labels: reason).
pub const CONNECTIONS_REMOVED_TOTAL: &str = "chatter_connections_removed_total";
/// Registered connections (gauge).
pub const CONNECTIONS_ACTIVE: &str = "chatter_connections_active";
/// Handshake writes that failed (counter).
pub const HANDSHAKE_FAILURES_TOTAL: &str = "chatter_handshake_failures_total";
/// Packets routed total (counter, labels: kind).
pub const PACKETS_ROUTED_TOTAL: &str = "chatter_packets_routed_total";
/// Envelopes dropped because the target was absent (counter).
pub const UNICAST_DROPS_TOTAL: &str = "chatter_unicast_drops_total";
/// Per-recipient send failures (counter).
pub const SEND_FAILURES_TOTAL: &str = "chatter_send_failures_total";
/// Announced users (gauge).
pub const ROSTER_SIZE: &str = "chatter_roster_size";
