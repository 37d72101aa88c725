//! Message: a single entry in a conversation's history.
//!
//! A message starts life as an optimistic local record in [`MessageStatus::Sending`]
//! and is promoted in place once the server confirms it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;
use crate::identity::MessageKey;
use crate::types::{ClientId, ConversationId, MessageId, Timestamp, UserId};

/// Discriminator for how a message's content is interpreted.
///
/// Closed set: unknown kinds are rejected before transmission and fail to
/// deserialize when received.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
    File,
    System,
}

impl MessageKind {
    /// Wire name of the kind.
    pub const fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Image => "image",
            MessageKind::File => "file",
            MessageKind::System => "system",
        }
    }
}

impl FromStr for MessageKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(MessageKind::Text),
            "image" => Ok(MessageKind::Image),
            "file" => Ok(MessageKind::File),
            "system" => Ok(MessageKind::System),
            other => Err(ValidationError::UnknownKind(other.to_owned())),
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivery status of a message from this client's point of view.
///
/// ```text
/// Sending ──(server echo / ack)──> Sent
///    └─────────(timeout)─────────> Error
/// ```
///
/// `Sent` and `Error` are terminal. Read tracking lives in `read_by`, not here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sending,
    Sent,
    Error,
}

impl MessageStatus {
    /// Check if no further transition is possible.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, MessageStatus::Sending)
    }

    /// Apply a transition, refusing to move out of a terminal status.
    pub fn advance(self, next: MessageStatus) -> MessageStatus {
        if self.is_terminal() {
            self
        } else {
            next
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MessageStatus::Sending => "sending",
            MessageStatus::Sent => "sent",
            MessageStatus::Error => "error",
        })
    }
}

/// Records received from the server carry no status and are confirmed by definition.
impl Default for MessageStatus {
    fn default() -> Self {
        MessageStatus::Sent
    }
}

/// A file or image attached to a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub url: String,
    pub name: String,
    pub mime_type: String,
    #[serde(default)]
    pub size: u64,
}

impl Attachment {
    /// Check if the attachment is an image by mime type.
    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }
}

/// A message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Server id, absent until acknowledged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<MessageId>,

    /// Client correlation id. Server-originated records (e.g. system
    /// messages) may not carry one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cid: Option<ClientId>,

    pub conversation_id: ConversationId,

    pub sender_id: UserId,

    #[serde(default)]
    pub content: String,

    #[serde(rename = "type")]
    pub kind: MessageKind,

    #[serde(default)]
    pub status: MessageStatus,

    #[serde(default)]
    pub attachments: Vec<Attachment>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<MessageId>,

    /// Users that have read this message.
    #[serde(default)]
    pub read_by: BTreeSet<UserId>,

    pub created_at: Timestamp,

    #[serde(default)]
    pub updated_at: Timestamp,
}

impl Message {
    /// Build the optimistic local record for a send attempt.
    #[allow(clippy::too_many_arguments)]
    pub fn optimistic(
        conversation_id: ConversationId,
        sender_id: UserId,
        cid: ClientId,
        content: String,
        kind: MessageKind,
        attachments: Vec<Attachment>,
        reply_to: Option<MessageId>,
        now: Timestamp,
    ) -> Self {
        Self {
            id: None,
            cid: Some(cid),
            conversation_id,
            sender_id,
            content,
            kind,
            status: MessageStatus::Sending,
            attachments,
            reply_to,
            read_by: BTreeSet::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// The identity key of this message (`id` if present, else `cid`).
    pub fn key(&self) -> Option<MessageKey> {
        MessageKey::of(self)
    }

    /// Check if the server has confirmed this message.
    pub fn is_acknowledged(&self) -> bool {
        self.id.is_some()
    }

    /// Check if the message is still waiting for the server.
    pub fn is_pending(&self) -> bool {
        self.status == MessageStatus::Sending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_only_moves_forward() {
        assert_eq!(MessageStatus::Sending.advance(MessageStatus::Sent), MessageStatus::Sent);
        assert_eq!(MessageStatus::Sending.advance(MessageStatus::Error), MessageStatus::Error);
        assert_eq!(MessageStatus::Sent.advance(MessageStatus::Error), MessageStatus::Sent);
        assert_eq!(MessageStatus::Error.advance(MessageStatus::Sent), MessageStatus::Error);
        assert_eq!(MessageStatus::Sent.advance(MessageStatus::Sending), MessageStatus::Sent);
    }

    #[test]
    fn test_kind_parse() {
        assert_eq!("image".parse::<MessageKind>().unwrap(), MessageKind::Image);
        assert!(matches!(
            "sticker".parse::<MessageKind>(),
            Err(ValidationError::UnknownKind(k)) if k == "sticker"
        ));
    }

    #[test]
    fn test_server_message_deserializes_as_sent() {
        let json = r#"{
            "id": "m1",
            "cid": "c1",
            "conversationId": "conv",
            "senderId": "bob",
            "content": "hi",
            "type": "text",
            "createdAt": 1000
        }"#;
        let msg: Message = serde_json::from_str(json).unwrap();
        assert_eq!(msg.status, MessageStatus::Sent);
        assert_eq!(msg.id, Some(MessageId::new("m1")));
        assert!(msg.read_by.is_empty());
    }

    #[test]
    fn test_unknown_kind_rejected_on_receive() {
        let json = r#"{
            "conversationId": "conv",
            "senderId": "bob",
            "type": "sticker",
            "createdAt": 1000
        }"#;
        assert!(serde_json::from_str::<Message>(json).is_err());
    }
}
