//! Error types for the transport module.

use thiserror::Error;

/// Errors that can occur on the event transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The transport has been shut down and will not reconnect.
    #[error("transport closed")]
    Closed,

    /// A frame could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),

    /// An event exceeded a wire limit.
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),

    /// An encoded frame is larger than allowed.
    #[error("frame of {len} bytes exceeds {max}")]
    FrameTooLarge { len: usize, max: usize },

    /// The peer on the other side is unknown to the relay.
    #[error("unknown client: {0}")]
    UnknownClient(String),
}

impl From<serde_json::Error> for TransportError {
    fn from(e: serde_json::Error) -> Self {
        TransportError::Codec(e.to_string())
    }
}

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;
