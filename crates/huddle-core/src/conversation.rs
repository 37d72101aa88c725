//! Conversation: a direct or group chat and its list summary.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::message::{Message, MessageKind};
use crate::types::{ConversationId, MessageId, Timestamp, UserId};

/// Whether a conversation is one-to-one or a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationKind {
    Direct,
    Group,
}

/// Summary of the latest message, shown in conversation lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<MessageId>,
    pub sender_id: UserId,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub created_at: Timestamp,
}

impl From<&Message> for LastMessage {
    fn from(message: &Message) -> Self {
        Self {
            id: message.id.clone(),
            sender_id: message.sender_id.clone(),
            content: message.content.clone(),
            kind: message.kind,
            created_at: message.created_at,
        }
    }
}

/// A conversation as known to this client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: ConversationId,

    #[serde(rename = "type")]
    pub kind: ConversationKind,

    pub participants: BTreeSet<UserId>,

    /// Display name (groups only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Avatar URL (groups only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<LastMessage>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_at: Option<Timestamp>,

    /// Unread count per participant, as reported by the server.
    #[serde(default)]
    pub unread_counts: BTreeMap<UserId, u32>,

    #[serde(default)]
    pub archived: bool,

    pub created_at: Timestamp,
}

impl Conversation {
    /// Check if this is the direct conversation between `a` and `b`.
    pub fn is_direct_between(&self, a: &UserId, b: &UserId) -> bool {
        if self.kind != ConversationKind::Direct {
            return false;
        }
        if a == b {
            return self.participants.len() == 1 && self.participants.contains(a);
        }
        self.participants.len() == 2 && self.participants.contains(a) && self.participants.contains(b)
    }

    /// The other participant of a direct conversation.
    pub fn peer_of(&self, me: &UserId) -> Option<&UserId> {
        match self.kind {
            ConversationKind::Direct => self.participants.iter().find(|p| *p != me),
            ConversationKind::Group => None,
        }
    }

    /// Server-reported unread count for `user`.
    pub fn unread_for(&self, user: &UserId) -> u32 {
        self.unread_counts.get(user).copied().unwrap_or(0)
    }

    /// Recency key used to order conversation lists.
    pub fn activity_at(&self) -> Timestamp {
        self.last_message_at.unwrap_or(self.created_at)
    }

    /// Record `message` as the latest one if it is not older than the current.
    ///
    /// Returns whether the summary changed.
    pub fn apply_message(&mut self, message: &Message) -> bool {
        let newer = self
            .last_message_at
            .map_or(true, |at| message.created_at >= at);
        if !newer {
            return false;
        }
        let summary = LastMessage::from(message);
        if self.last_message.as_ref() == Some(&summary) {
            return false;
        }
        self.last_message = Some(summary);
        self.last_message_at = Some(message.created_at);
        true
    }
}
