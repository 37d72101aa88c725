//! Wire events exchanged over the persistent connection.
//!
//! Frames are adjacently tagged JSON objects:
//!
//! ```text
//! { "event": "send-message", "data": { "cid": "...", "conversationId": "...", ... } }
//! { "event": "reconnected" }
//! ```

use serde::{Deserialize, Serialize};

use huddle_core::{
    Attachment, ClientId, ConversationId, Message, MessageId, MessageKind, Timestamp, UserId,
};

/// Wire size limits.
///
/// Message limits are the ones outgoing validation enforces.
pub mod limits {
    pub use huddle_core::{MAX_ATTACHMENTS, MAX_CONTENT_CHARS};

    /// Max messages in one delta-sync response.
    pub const MAX_DELTA_MESSAGES: usize = 500;
    /// Max message ids in one read receipt.
    pub const MAX_READ_IDS: usize = 500;
    /// Max encoded frame size in bytes.
    pub const MAX_FRAME_BYTES: usize = 1 << 20;
}

/// Events this client emits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum OutboundEvent {
    /// Deliver a new message. The server echoes it back tagged with `cid`.
    SendMessage {
        cid: ClientId,
        conversation_id: ConversationId,
        content: String,
        #[serde(rename = "type")]
        kind: MessageKind,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        attachments: Vec<Attachment>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reply_to: Option<MessageId>,
    },

    /// Subscribe to a conversation's live events.
    JoinRoom { conversation_id: ConversationId },

    /// Unsubscribe from a conversation's live events.
    LeaveRoom { conversation_id: ConversationId },

    TypingStart { conversation_id: ConversationId },

    TypingStop { conversation_id: ConversationId },

    /// Ask for every message created after `since_timestamp`.
    DeltaSyncRequest {
        conversation_id: ConversationId,
        since_timestamp: Timestamp,
    },
}

impl OutboundEvent {
    /// The conversation this event concerns.
    pub fn conversation_id(&self) -> &ConversationId {
        match self {
            OutboundEvent::SendMessage { conversation_id, .. }
            | OutboundEvent::JoinRoom { conversation_id }
            | OutboundEvent::LeaveRoom { conversation_id }
            | OutboundEvent::TypingStart { conversation_id }
            | OutboundEvent::TypingStop { conversation_id }
            | OutboundEvent::DeltaSyncRequest { conversation_id, .. } => conversation_id,
        }
    }

    /// Check if this event respects size limits.
    pub fn validate_limits(&self) -> Result<(), &'static str> {
        if let OutboundEvent::SendMessage {
            content,
            attachments,
            ..
        } = self
        {
            if content.chars().count() > limits::MAX_CONTENT_CHARS {
                return Err("content too long");
            }
            if attachments.len() > limits::MAX_ATTACHMENTS {
                return Err("too many attachments");
            }
        }
        Ok(())
    }
}

/// Events the transport delivers to this client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum InboundEvent {
    /// A message was posted in a subscribed room (including echoes of our own).
    NewMessage(Message),

    /// The server accepted one of our sends.
    MessageAck {
        conversation_id: ConversationId,
        cid: ClientId,
        id: MessageId,
        created_at: Timestamp,
    },

    /// A user has read messages.
    MessagesRead {
        conversation_id: ConversationId,
        user_id: UserId,
        message_ids: Vec<MessageId>,
    },

    TypingStart {
        conversation_id: ConversationId,
        user_id: UserId,
    },

    TypingStop {
        conversation_id: ConversationId,
        user_id: UserId,
    },

    /// Answer to a delta-sync request.
    DeltaSyncResponse {
        conversation_id: ConversationId,
        since_timestamp: Timestamp,
        messages: Vec<Message>,
    },

    /// The connection dropped. Emitted locally by the transport.
    Disconnected,

    /// The connection came back after an outage. Emitted locally by the transport.
    Reconnected,
}

impl InboundEvent {
    /// Check if this event respects size limits.
    pub fn validate_limits(&self) -> Result<(), &'static str> {
        match self {
            InboundEvent::DeltaSyncResponse { messages, .. } => {
                if messages.len() > limits::MAX_DELTA_MESSAGES {
                    return Err("too many delta messages");
                }
            }
            InboundEvent::MessagesRead { message_ids, .. } => {
                if message_ids.len() > limits::MAX_READ_IDS {
                    return Err("too many read ids");
                }
            }
            InboundEvent::NewMessage(message) => {
                if message.attachments.len() > limits::MAX_ATTACHMENTS {
                    return Err("too many attachments");
                }
            }
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_message_wire_shape() {
        let event = OutboundEvent::SendMessage {
            cid: ClientId::from("c1"),
            conversation_id: ConversationId::from("conv"),
            content: "hello".into(),
            kind: MessageKind::Text,
            attachments: vec![],
            reply_to: None,
        };
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["event"], "send-message");
        assert_eq!(json["data"]["cid"], "c1");
        assert_eq!(json["data"]["conversationId"], "conv");
        assert_eq!(json["data"]["type"], "text");
        assert!(json["data"].get("attachments").is_none());
    }

    #[test]
    fn test_limits_agree_with_validation() {
        use huddle_core::{validate_outgoing, OutgoingMessage};

        let send = |content: String| OutboundEvent::SendMessage {
            cid: ClientId::from("c1"),
            conversation_id: ConversationId::from("conv"),
            content,
            kind: MessageKind::Text,
            attachments: vec![],
            reply_to: None,
        };
        let longest = "x".repeat(limits::MAX_CONTENT_CHARS);
        let too_long = "x".repeat(limits::MAX_CONTENT_CHARS + 1);

        assert!(validate_outgoing(OutgoingMessage::text(longest.clone())).is_ok());
        assert!(send(longest).validate_limits().is_ok());
        assert!(validate_outgoing(OutgoingMessage::text(too_long.clone())).is_err());
        assert!(send(too_long).validate_limits().is_err());
    }

    #[test]
    fn test_delta_request_wire_shape() {
        let event = OutboundEvent::DeltaSyncRequest {
            conversation_id: ConversationId::from("conv"),
            since_timestamp: 42,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "delta-sync-request");
        assert_eq!(json["data"]["sinceTimestamp"], 42);
    }

    #[test]
    fn test_unit_inbound_events() {
        let event: InboundEvent = serde_json::from_str(r#"{"event":"reconnected"}"#).unwrap();
        assert_eq!(event, InboundEvent::Reconnected);
    }

    #[test]
    fn test_limits_exceeded() {
        let event = OutboundEvent::SendMessage {
            cid: ClientId::from("c1"),
            conversation_id: ConversationId::from("conv"),
            content: "x".repeat(limits::MAX_CONTENT_CHARS + 1),
            kind: MessageKind::Text,
            attachments: vec![],
            reply_to: None,
        };
        assert!(event.validate_limits().is_err());
    }
}
