//! Outgoing message validation.
//!
//! A send request is checked and its kind resolved before the optimistic
//! record is created, so invalid input never reaches the transport.

use crate::error::ValidationError;
use crate::message::{Attachment, MessageKind};
use crate::types::MessageId;

/// Max characters of message content.
pub const MAX_CONTENT_CHARS: usize = 10_000;

/// Max attachments on one message.
pub const MAX_ATTACHMENTS: usize = 10;

/// A message the user wants to send, before validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub content: String,
    pub attachments: Vec<Attachment>,
    pub reply_to: Option<MessageId>,
    /// Explicit kind name. Inferred from the attachments when absent.
    pub kind: Option<String>,
}

impl OutgoingMessage {
    /// A plain text message.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    /// Attach files.
    pub fn with_attachments(mut self, attachments: Vec<Attachment>) -> Self {
        self.attachments = attachments;
        self
    }

    /// Reply to an existing message.
    pub fn reply_to(mut self, id: MessageId) -> Self {
        self.reply_to = Some(id);
        self
    }

    /// Force a kind by wire name.
    pub fn kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }
}

/// A send request that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedMessage {
    /// Trimmed content.
    pub content: String,
    pub kind: MessageKind,
    pub attachments: Vec<Attachment>,
    pub reply_to: Option<MessageId>,
}

/// Validate an outgoing message and resolve its kind.
pub fn validate_outgoing(message: OutgoingMessage) -> Result<ValidatedMessage, ValidationError> {
    let content = message.content.trim().to_owned();

    if content.is_empty() && message.attachments.is_empty() {
        return Err(ValidationError::Empty);
    }

    let len = content.chars().count();
    if len > MAX_CONTENT_CHARS {
        return Err(ValidationError::ContentTooLong {
            len,
            max: MAX_CONTENT_CHARS,
        });
    }

    if message.attachments.len() > MAX_ATTACHMENTS {
        return Err(ValidationError::TooManyAttachments {
            count: message.attachments.len(),
            max: MAX_ATTACHMENTS,
        });
    }

    let kind = match message.kind.as_deref() {
        Some(name) => name.parse::<MessageKind>()?,
        None => infer_kind(&message.attachments),
    };

    match kind {
        MessageKind::System => {
            return Err(ValidationError::KindNotSendable(kind.to_string()));
        }
        MessageKind::Image | MessageKind::File if message.attachments.is_empty() => {
            return Err(ValidationError::MissingAttachment {
                kind: kind.to_string(),
            });
        }
        _ => {}
    }

    Ok(ValidatedMessage {
        content,
        kind,
        attachments: message.attachments,
        reply_to: message.reply_to,
    })
}

fn infer_kind(attachments: &[Attachment]) -> MessageKind {
    if attachments.is_empty() {
        MessageKind::Text
    } else if attachments.iter().all(Attachment::is_image) {
        MessageKind::Image
    } else {
        MessageKind::File
    }
}
