//! Error types for the API module.

use thiserror::Error;

/// Errors returned by the request/response API.
///
/// `Clone` so one failed request can be reported to every caller that was
/// waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// The resource does not exist (or is not visible to this user).
    #[error("not found: {0}")]
    NotFound(String),

    /// The user may not perform this operation.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The request conflicts with server state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The request was rejected as malformed.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Any other non-success HTTP status.
    #[error("http {status}: {message}")]
    Http { status: u16, message: String },

    /// The request never reached the server or the connection dropped.
    #[error("network error: {0}")]
    Network(String),

    /// The response body could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),
}

impl ApiError {
    /// Check if repeating the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Network(_) => true,
            ApiError::Http { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

/// Result type for API operations.
pub type Result<T> = std::result::Result<T, ApiError>;
