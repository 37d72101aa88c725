//! Error types for the engine.

use huddle_api::ApiError;
use huddle_core::{ClientId, ConversationId, MessageStatus, ValidationError};
use huddle_transport::TransportError;
use thiserror::Error;

/// Errors returned by user-initiated engine actions.
///
/// Background work (history pages, list refreshes, delta sync) never returns
/// these; it records a last-error string on the owning component instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// The outgoing message was rejected before transmission.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// The request/response API failed.
    #[error("api error: {0}")]
    Api(#[from] ApiError),

    /// The event transport failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// No local state for this conversation.
    #[error("conversation not found: {0}")]
    ConversationNotFound(ConversationId),

    /// No local record with this correlation id.
    #[error("message not found: {0}")]
    MessageNotFound(ClientId),

    /// Only failed sends the server never confirmed can be retried.
    #[error("message {cid} is {status}, only unconfirmed failed messages can be retried")]
    NotRetryable { cid: ClientId, status: MessageStatus },

    /// Invalid operation.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
