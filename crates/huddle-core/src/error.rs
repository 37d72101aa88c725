//! Error types for Huddle core.

use thiserror::Error;

/// Validation errors for outgoing messages.
///
/// All of these are raised before anything is transmitted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("message has neither content nor attachments")]
    Empty,

    #[error("unknown message kind: {0}")]
    UnknownKind(String),

    #[error("message kind {0} cannot be sent by a client")]
    KindNotSendable(String),

    #[error("content is {len} characters, maximum is {max}")]
    ContentTooLong { len: usize, max: usize },

    #[error("{count} attachments, maximum is {max}")]
    TooManyAttachments { count: usize, max: usize },

    #[error("{kind} message requires at least one attachment")]
    MissingAttachment { kind: String },
}
