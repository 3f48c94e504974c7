//! Package-level constants and protocol timings.

use std::time::Duration;

/// Current version of the Chatter relay (sourced from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Package name.
pub const NAME: &str = "chatter";

/// How long a client waits for the identity line after connecting.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Quiet period after which a connection probes its peer.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Window in which a heartbeat reply must arrive once a probe is outstanding.
pub const HEARTBEAT_GRACE: Duration = Duration::from_secs(5);

/// Largest frame body accepted from the wire (1 MiB).
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

/// Longest identity line accepted during the handshake.
pub const MAX_HANDSHAKE_LINE: usize = 128;

/// Username the relay uses for its own notices.
pub const SERVER_USERNAME: &str = "Server";

/// Color tag the relay uses for its own notices.
pub const SERVER_COLOR: &str = "purple";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_semver() {
        let parts: Vec<&str> = VERSION.split('.').collect();
        assert_eq!(parts.len(), 3, "VERSION must be semver (MAJOR.MINOR.PATCH)");
        for part in parts {
            let _: u32 = part.parse().expect("each semver segment must be a number");
        }
    }

    #[test]
    fn name_is_lowercase() {
        assert_eq!(NAME, NAME.to_lowercase());
    }

    #[test]
    fn liveness_window_is_idle_plus_grace() {
        assert_eq!(IDLE_TIMEOUT + HEARTBEAT_GRACE, Duration::from_secs(10));
    }
}
