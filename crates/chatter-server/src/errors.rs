//! Server error types.

use thiserror::Error;

/// Failure to start the relay.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listening socket could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Requested bind address.
        addr: String,
        /// Underlying socket error.
        #[source]
        source: std::io::Error,
    },
    /// Any other socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
