//! Connect-time errors.

use std::time::Duration;

use thiserror::Error;

/// Failure to establish a connection. Fatal to the attempt; nothing retries.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// The peer refused the TCP connection or was unreachable.
    #[error("connection to {addr} refused: {source}")]
    Refused {
        /// Address that was dialled.
        addr: String,
        /// Underlying socket error.
        #[source]
        source: std::io::Error,
    },
    /// The TCP connect did not complete in time.
    #[error("connection to {addr} timed out after {timeout:?}")]
    Timeout {
        /// Address that was dialled.
        addr: String,
        /// The bound that elapsed.
        timeout: Duration,
    },
    /// No identity line arrived within the handshake window.
    #[error("no identity received within {0:?}")]
    HandshakeTimeout(Duration),
    /// The identity line was malformed.
    #[error("invalid handshake: {0}")]
    InvalidHandshake(String),
    /// The peer closed the socket before the handshake completed.
    #[error("connection closed during handshake")]
    Closed,
    /// Any other socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConnectError {
    /// Whether the failure happened after TCP connect succeeded.
    pub fn is_handshake_failure(&self) -> bool {
        matches!(
            self,
            Self::HandshakeTimeout(_) | Self::InvalidHandshake(_) | Self::Closed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refused_display_names_address() {
        let err = ConnectError::Refused {
            addr: "127.0.0.1:1".into(),
            source: std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
        };
        assert!(err.to_string().contains("127.0.0.1:1"));
        assert!(!err.is_handshake_failure());
    }

    #[test]
    fn handshake_timeout_display() {
        let err = ConnectError::HandshakeTimeout(Duration::from_secs(5));
        assert_eq!(err.to_string(), "no identity received within 5s");
        assert!(err.is_handshake_failure());
    }

    #[test]
    fn io_from_conversion() {
        let err: ConnectError = std::io::Error::other("boom").into();
        assert!(matches!(err, ConnectError::Io(_)));
    }
}
