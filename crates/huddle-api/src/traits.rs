//! ChatApi trait: the abstract interface to the request/response backend.
//!
//! The engine never talks HTTP directly. Implementations include a real HTTP
//! client (outside this workspace) and [`MemoryApi`](crate::MemoryApi) for tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use huddle_core::{Conversation, ConversationId, Message, MessageId, Timestamp, UserId};

use crate::error::Result;

/// Default number of messages per history page.
pub const DEFAULT_PAGE_SIZE: usize = 50;

/// Cursor for paginating history backwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PageCursor {
    /// Messages created strictly before this time.
    Timestamp(Timestamp),
    /// Messages created before this message (exclusive).
    Message(MessageId),
}

/// A request for one page of history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageQuery {
    /// `None` requests the newest page.
    pub before: Option<PageCursor>,
    pub limit: usize,
}

impl PageQuery {
    /// The newest page.
    pub fn latest(limit: usize) -> Self {
        Self { before: None, limit }
    }

    /// The page preceding `cursor`.
    pub fn before(cursor: PageCursor, limit: usize) -> Self {
        Self {
            before: Some(cursor),
            limit,
        }
    }
}

/// One page of history, ascending by `created_at`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePage {
    pub messages: Vec<Message>,
    /// Whether older messages exist beyond this page.
    pub has_more: bool,
}

/// Parameters for creating a group conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewGroup {
    pub name: String,
    pub members: Vec<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

/// The request/response API consumed by the engine.
///
/// Every call is authenticated as one user; implementations carry that
/// identity themselves.
#[async_trait]
pub trait ChatApi: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Conversations
    // ─────────────────────────────────────────────────────────────────────────

    /// List every conversation the user participates in, archived included.
    async fn list_conversations(&self) -> Result<Vec<Conversation>>;

    /// Get one conversation.
    async fn get_conversation(&self, id: &ConversationId) -> Result<Conversation>;

    /// Create a direct conversation with `peer`.
    ///
    /// The server may return an existing conversation for the pair.
    async fn create_direct(&self, peer: &UserId) -> Result<Conversation>;

    /// Create a group conversation.
    async fn create_group(&self, group: &NewGroup) -> Result<Conversation>;

    /// Reset the user's unread counter for a conversation.
    async fn mark_read(&self, id: &ConversationId) -> Result<()>;

    async fn archive(&self, id: &ConversationId) -> Result<()>;

    async fn unarchive(&self, id: &ConversationId) -> Result<()>;

    async fn delete(&self, id: &ConversationId) -> Result<()>;

    // ─────────────────────────────────────────────────────────────────────────
    // Group membership
    // ─────────────────────────────────────────────────────────────────────────

    /// Add a member to a group. Returns the updated conversation.
    async fn add_member(&self, id: &ConversationId, user: &UserId) -> Result<Conversation>;

    /// Remove a member from a group. Returns the updated conversation.
    async fn remove_member(&self, id: &ConversationId, user: &UserId) -> Result<Conversation>;

    /// Leave a group.
    async fn leave_group(&self, id: &ConversationId) -> Result<()>;

    // ─────────────────────────────────────────────────────────────────────────
    // History
    // ─────────────────────────────────────────────────────────────────────────

    /// Get one page of message history.
    async fn get_messages(&self, id: &ConversationId, query: &PageQuery) -> Result<MessagePage>;
}
