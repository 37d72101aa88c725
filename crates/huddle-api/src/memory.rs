//! In-memory implementation of the ChatApi trait.
//!
//! This is primarily for testing. It behaves like a small chat server seen by
//! one user: it assigns ids, keeps history sorted, tracks unread counters and
//! counts calls so tests can assert how many requests the engine issued.

use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;

use huddle_core::{
    now_millis, ClientId, Conversation, ConversationId, ConversationKind, Message, MessageId,
    MessageKind, MessageStatus, Timestamp, UserId,
};

use crate::error::{ApiError, Result};
use crate::traits::{ChatApi, MessagePage, NewGroup, PageCursor, PageQuery};

/// Names of API operations, used for call counting and fault injection.
pub mod ops {
    pub const LIST_CONVERSATIONS: &str = "list_conversations";
    pub const GET_CONVERSATION: &str = "get_conversation";
    pub const CREATE_DIRECT: &str = "create_direct";
    pub const CREATE_GROUP: &str = "create_group";
    pub const MARK_READ: &str = "mark_read";
    pub const ARCHIVE: &str = "archive";
    pub const UNARCHIVE: &str = "unarchive";
    pub const DELETE: &str = "delete";
    pub const ADD_MEMBER: &str = "add_member";
    pub const REMOVE_MEMBER: &str = "remove_member";
    pub const LEAVE_GROUP: &str = "leave_group";
    pub const GET_MESSAGES: &str = "get_messages";
}

/// In-memory API server.
///
/// Thread-safe via RwLock. Locks are never held across an await.
pub struct MemoryApi {
    me: UserId,
    inner: RwLock<MemoryApiInner>,
}

struct MemoryApiInner {
    /// Conversations by id.
    conversations: BTreeMap<ConversationId, Conversation>,

    /// History per conversation, ascending by created_at.
    messages: HashMap<ConversationId, Vec<Message>>,

    /// Calls per operation.
    calls: HashMap<&'static str, usize>,

    /// One-shot failures per operation.
    failures: HashMap<&'static str, ApiError>,

    /// Simulated latency per operation.
    latency: HashMap<&'static str, Duration>,

    /// Counter for server-assigned ids.
    next_id: u64,
}

impl MemoryApi {
    /// Create an empty server seen by `me`.
    pub fn new(me: impl Into<UserId>) -> Self {
        Self {
            me: me.into(),
            inner: RwLock::new(MemoryApiInner {
                conversations: BTreeMap::new(),
                messages: HashMap::new(),
                calls: HashMap::new(),
                failures: HashMap::new(),
                latency: HashMap::new(),
                next_id: 1,
            }),
        }
    }

    /// The user this server authenticates as.
    pub fn user(&self) -> &UserId {
        &self.me
    }

    fn read(&self) -> RwLockReadGuard<'_, MemoryApiInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, MemoryApiInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Test controls
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert or replace a conversation.
    pub fn seed_conversation(&self, conversation: Conversation) {
        let mut inner = self.write();
        inner
            .messages
            .entry(conversation.id.clone())
            .or_default();
        inner
            .conversations
            .insert(conversation.id.clone(), conversation);
    }

    /// Append history to a conversation. Messages without an id get one.
    pub fn seed_messages(&self, conversation_id: &ConversationId, messages: Vec<Message>) {
        let mut inner = self.write();
        for mut message in messages {
            if message.id.is_none() {
                message.id = Some(inner.mint_message_id());
            }
            message.status = MessageStatus::Sent;
            inner.insert_message(conversation_id, message);
        }
    }

    /// Store a message as if the server had accepted a send from `sender`.
    ///
    /// Returns the stored record (with server id and timestamp), which is what
    /// the server would echo over the transport.
    pub fn accept_message(
        &self,
        conversation_id: &ConversationId,
        sender: &UserId,
        cid: Option<ClientId>,
        content: &str,
        created_at: Option<Timestamp>,
    ) -> Message {
        let mut inner = self.write();
        let at = created_at.unwrap_or_else(now_millis);
        let message = Message {
            id: Some(inner.mint_message_id()),
            cid,
            conversation_id: conversation_id.clone(),
            sender_id: sender.clone(),
            content: content.to_owned(),
            kind: MessageKind::Text,
            status: MessageStatus::Sent,
            attachments: vec![],
            reply_to: None,
            read_by: Default::default(),
            created_at: at,
            updated_at: at,
        };
        inner.insert_message(conversation_id, message.clone());
        message
    }

    /// Messages created strictly after `since`, oldest first.
    pub fn messages_since(&self, conversation_id: &ConversationId, since: Timestamp) -> Vec<Message> {
        self.read()
            .messages
            .get(conversation_id)
            .map(|list| {
                list.iter()
                    .filter(|m| m.created_at > since)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Server copy of a conversation.
    pub fn conversation(&self, id: &ConversationId) -> Option<Conversation> {
        self.read().conversations.get(id).cloned()
    }

    /// Number of calls made to `op` (see [`ops`]).
    pub fn call_count(&self, op: &str) -> usize {
        self.read().calls.get(op).copied().unwrap_or(0)
    }

    /// Make the next call to `op` fail with `error`.
    pub fn fail_next(&self, op: &'static str, error: ApiError) {
        self.write().failures.insert(op, error);
    }

    /// Delay every call to `op` by `delay`.
    pub fn set_latency(&self, op: &'static str, delay: Duration) {
        self.write().latency.insert(op, delay);
    }

    /// Count the call, apply latency and injected failure.
    async fn enter(&self, op: &'static str) -> Result<()> {
        let delay = {
            let mut inner = self.write();
            *inner.calls.entry(op).or_default() += 1;
            inner.latency.get(op).copied()
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match self.write().failures.remove(op) {
            Some(error) => {
                tracing::debug!(op, %error, "injected api failure");
                Err(error)
            }
            None => Ok(()),
        }
    }
}

impl MemoryApiInner {
    fn mint_message_id(&mut self) -> MessageId {
        let id = MessageId::new(format!("m{}", self.next_id));
        self.next_id += 1;
        id
    }

    fn mint_conversation_id(&mut self) -> ConversationId {
        let id = ConversationId::new(format!("conv-{}", self.next_id));
        self.next_id += 1;
        id
    }

    fn insert_message(&mut self, conversation_id: &ConversationId, message: Message) {
        if let Some(conversation) = self.conversations.get_mut(conversation_id) {
            conversation.apply_message(&message);
            for user in conversation.participants.iter() {
                if user != &message.sender_id {
                    *conversation.unread_counts.entry(user.clone()).or_default() += 1;
                }
            }
        }
        let list = self.messages.entry(conversation_id.clone()).or_default();
        let at = list.partition_point(|m| m.created_at <= message.created_at);
        list.insert(at, message);
    }

    fn member_conversation(&mut self, id: &ConversationId, me: &UserId) -> Result<&mut Conversation> {
        match self.conversations.get_mut(id) {
            Some(c) if c.participants.contains(me) => Ok(c),
            Some(_) => Err(ApiError::Forbidden(format!("not a member of {}", id))),
            None => Err(ApiError::NotFound(format!("conversation {}", id))),
        }
    }
}

#[async_trait]
impl ChatApi for MemoryApi {
    async fn list_conversations(&self) -> Result<Vec<Conversation>> {
        self.enter(ops::LIST_CONVERSATIONS).await?;
        let inner = self.read();
        Ok(inner
            .conversations
            .values()
            .filter(|c| c.participants.contains(&self.me))
            .cloned()
            .collect())
    }

    async fn get_conversation(&self, id: &ConversationId) -> Result<Conversation> {
        self.enter(ops::GET_CONVERSATION).await?;
        let mut inner = self.write();
        inner.member_conversation(id, &self.me).map(|c| c.clone())
    }

    async fn create_direct(&self, peer: &UserId) -> Result<Conversation> {
        self.enter(ops::CREATE_DIRECT).await?;
        let mut inner = self.write();

        if let Some(existing) = inner
            .conversations
            .values()
            .find(|c| c.is_direct_between(&self.me, peer))
        {
            return Ok(existing.clone());
        }

        let id = inner.mint_conversation_id();
        let conversation = Conversation {
            id: id.clone(),
            kind: ConversationKind::Direct,
            participants: [self.me.clone(), peer.clone()].into_iter().collect(),
            name: None,
            avatar: None,
            last_message: None,
            last_message_at: None,
            unread_counts: BTreeMap::new(),
            archived: false,
            created_at: now_millis(),
        };
        inner.messages.entry(id.clone()).or_default();
        inner.conversations.insert(id, conversation.clone());
        Ok(conversation)
    }

    async fn create_group(&self, group: &NewGroup) -> Result<Conversation> {
        self.enter(ops::CREATE_GROUP).await?;
        if group.name.trim().is_empty() {
            return Err(ApiError::BadRequest("group name is required".into()));
        }
        let mut inner = self.write();
        let id = inner.mint_conversation_id();
        let mut participants: std::collections::BTreeSet<UserId> =
            group.members.iter().cloned().collect();
        participants.insert(self.me.clone());
        let conversation = Conversation {
            id: id.clone(),
            kind: ConversationKind::Group,
            participants,
            name: Some(group.name.clone()),
            avatar: group.avatar.clone(),
            last_message: None,
            last_message_at: None,
            unread_counts: BTreeMap::new(),
            archived: false,
            created_at: now_millis(),
        };
        inner.messages.entry(id.clone()).or_default();
        inner.conversations.insert(id, conversation.clone());
        Ok(conversation)
    }

    async fn mark_read(&self, id: &ConversationId) -> Result<()> {
        self.enter(ops::MARK_READ).await?;
        let mut inner = self.write();
        let me = self.me.clone();
        let conversation = inner.member_conversation(id, &me)?;
        conversation.unread_counts.insert(me, 0);
        Ok(())
    }

    async fn archive(&self, id: &ConversationId) -> Result<()> {
        self.enter(ops::ARCHIVE).await?;
        let mut inner = self.write();
        inner.member_conversation(id, &self.me)?.archived = true;
        Ok(())
    }

    async fn unarchive(&self, id: &ConversationId) -> Result<()> {
        self.enter(ops::UNARCHIVE).await?;
        let mut inner = self.write();
        inner.member_conversation(id, &self.me)?.archived = false;
        Ok(())
    }

    async fn delete(&self, id: &ConversationId) -> Result<()> {
        self.enter(ops::DELETE).await?;
        let mut inner = self.write();
        inner.member_conversation(id, &self.me)?;
        inner.conversations.remove(id);
        inner.messages.remove(id);
        Ok(())
    }

    async fn add_member(&self, id: &ConversationId, user: &UserId) -> Result<Conversation> {
        self.enter(ops::ADD_MEMBER).await?;
        let mut inner = self.write();
        let conversation = inner.member_conversation(id, &self.me)?;
        if conversation.kind != ConversationKind::Group {
            return Err(ApiError::BadRequest("members can only be added to groups".into()));
        }
        if !conversation.participants.insert(user.clone()) {
            return Err(ApiError::Conflict(format!("{} is already a member", user)));
        }
        Ok(conversation.clone())
    }

    async fn remove_member(&self, id: &ConversationId, user: &UserId) -> Result<Conversation> {
        self.enter(ops::REMOVE_MEMBER).await?;
        let mut inner = self.write();
        let conversation = inner.member_conversation(id, &self.me)?;
        if conversation.kind != ConversationKind::Group {
            return Err(ApiError::BadRequest("members can only be removed from groups".into()));
        }
        if !conversation.participants.remove(user) {
            return Err(ApiError::NotFound(format!("{} is not a member", user)));
        }
        conversation.unread_counts.remove(user);
        Ok(conversation.clone())
    }

    async fn leave_group(&self, id: &ConversationId) -> Result<()> {
        self.enter(ops::LEAVE_GROUP).await?;
        let mut inner = self.write();
        let me = self.me.clone();
        let conversation = inner.member_conversation(id, &me)?;
        if conversation.kind != ConversationKind::Group {
            return Err(ApiError::BadRequest("cannot leave a direct conversation".into()));
        }
        conversation.participants.remove(&me);
        conversation.unread_counts.remove(&me);
        Ok(())
    }

    async fn get_messages(&self, id: &ConversationId, query: &PageQuery) -> Result<MessagePage> {
        self.enter(ops::GET_MESSAGES).await?;
        let mut inner = self.write();
        inner.member_conversation(id, &self.me)?;
        let list = inner.messages.get(id).map(Vec::as_slice).unwrap_or_default();

        // Index one past the newest message that belongs to the page.
        let end = match &query.before {
            None => list.len(),
            Some(PageCursor::Timestamp(at)) => list.partition_point(|m| m.created_at < *at),
            Some(PageCursor::Message(cursor)) => list
                .iter()
                .position(|m| m.id.as_ref() == Some(cursor))
                .ok_or_else(|| ApiError::NotFound(format!("message {}", cursor)))?,
        };
        let start = end.saturating_sub(query.limit);

        Ok(MessagePage {
            messages: list[start..end].to_vec(),
            has_more: start > 0,
        })
    }
}
