//! ConversationDirectory: conversation list, unread counters and lifecycle.
//!
//! ## Direct conversation creation
//!
//! [`ConversationDirectory::get_or_create_direct`] resolves a peer to exactly
//! one conversation per session:
//!
//! 1. Under one lock acquisition: return the cached conversation for the pair,
//!    else join the creation already in flight for that peer, else register a
//!    new shared creation future.
//! 2. Await the shared future (every caller observes the same result).
//! 3. Deregister it (only the registering future is removed) and merge the
//!    result if a concurrent refresh has not already inserted it.
//!
//! ## Unread counters
//!
//! Counters are seeded from the server. A read-mark zeroes the counter when
//! its response arrives, except for messages created after the mark was
//! issued, which still count.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared};

use huddle_api::{ApiError, ChatApi, NewGroup};
use huddle_core::{now_millis, Conversation, ConversationId, Message, Timestamp, UserId};

use crate::active::ActiveConversation;
use crate::error::Result;
use crate::events::{EngineEvent, EventBus};

type PendingDirect = Shared<BoxFuture<'static, std::result::Result<Conversation, ApiError>>>;

/// A read-mark whose response has not arrived yet.
#[derive(Debug, Clone, Copy)]
struct PendingMark {
    token: u64,
    issued_at: Timestamp,
    /// Messages counted since the mark was issued.
    since: u32,
}

#[derive(Debug, Default)]
struct UnreadCounter {
    count: u32,
    /// Messages created at or before this are read.
    read_through: Option<Timestamp>,
    mark: Option<PendingMark>,
}

#[derive(Default)]
struct DirectoryState {
    conversations: HashMap<ConversationId, Conversation>,
    unread: HashMap<ConversationId, UnreadCounter>,
    /// In-flight direct creations by peer.
    pending_direct: HashMap<UserId, PendingDirect>,
    /// Unknown conversations being fetched in the background.
    fetching: HashSet<ConversationId>,
    next_token: u64,
    last_error: Option<String>,
}

impl DirectoryState {
    /// The direct conversation treated as canonical for a pair.
    ///
    /// Earliest created wins, then smallest id.
    fn canonical_direct(&self, me: &UserId, peer: &UserId) -> Option<&Conversation> {
        self.conversations
            .values()
            .filter(|c| c.is_direct_between(me, peer))
            .min_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)))
    }

    /// Insert or replace a conversation from a server response.
    ///
    /// Returns the new unread count if seeding changed it.
    fn upsert(&mut self, me: &UserId, mut conversation: Conversation) -> Option<u32> {
        if let Some(existing) = self.conversations.get(&conversation.id) {
            if existing.last_message_at > conversation.last_message_at {
                conversation.last_message = existing.last_message.clone();
                conversation.last_message_at = existing.last_message_at;
            }
        }

        let counter = self.unread.entry(conversation.id.clone()).or_default();
        let mut seeded = None;
        if counter.mark.is_none() {
            let server = conversation.unread_for(me);
            if counter.count != server {
                counter.count = server;
                seeded = Some(server);
            }
        }

        self.conversations.insert(conversation.id.clone(), conversation);
        seeded
    }

    fn remove(&mut self, id: &ConversationId) -> bool {
        self.unread.remove(id);
        self.conversations.remove(id).is_some()
    }

    fn unread(&self, id: &ConversationId) -> u32 {
        self.unread.get(id).map_or(0, |c| c.count)
    }

    /// Conversations matching `archived`, most recent activity first.
    fn sorted(&self, me: &UserId, archived: bool) -> Vec<Conversation> {
        let mut list: Vec<Conversation> = self
            .conversations
            .values()
            .filter(|c| c.archived == archived)
            .map(|c| {
                let mut view = c.clone();
                view.unread_counts.insert(me.clone(), self.unread(&c.id));
                view
            })
            .collect();
        list.sort_by(|a, b| {
            b.activity_at()
                .cmp(&a.activity_at())
                .then_with(|| a.id.cmp(&b.id))
        });
        list
    }
}

struct DirectoryInner {
    me: UserId,
    api: Arc<dyn ChatApi>,
    active: ActiveConversation,
    events: EventBus,
    state: Mutex<DirectoryState>,
}

/// The user's conversations.
#[derive(Clone)]
pub struct ConversationDirectory {
    inner: Arc<DirectoryInner>,
}

impl ConversationDirectory {
    pub fn new(
        me: UserId,
        api: Arc<dyn ChatApi>,
        active: ActiveConversation,
        events: EventBus,
    ) -> Self {
        Self {
            inner: Arc::new(DirectoryInner {
                me,
                api,
                active,
                events,
                state: Mutex::new(DirectoryState::default()),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, DirectoryState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn changed(&self) {
        self.inner.events.emit(EngineEvent::ConversationsChanged);
    }

    fn unread_changed(&self, conversation: &ConversationId, count: u32) {
        self.inner.events.emit(EngineEvent::UnreadChanged {
            conversation_id: conversation.clone(),
            count,
        });
    }

    /// Merge a server copy and publish the resulting events.
    fn absorb(&self, conversation: Conversation) {
        let id = conversation.id.clone();
        let seeded = self.state().upsert(&self.inner.me, conversation);
        self.changed();
        if let Some(count) = seeded {
            self.unread_changed(&id, count);
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────────

    /// Reload the conversation list.
    ///
    /// Failures are recorded in [`last_error`](Self::last_error). Returns
    /// whether the list was loaded.
    pub async fn refresh(&self) -> bool {
        let list = match self.inner.api.list_conversations().await {
            Ok(list) => list,
            Err(error) => {
                tracing::warn!(%error, "conversation list refresh failed");
                self.state().last_error = Some(error.to_string());
                return false;
            }
        };

        let (removed, seeded) = {
            let mut state = self.state();
            state.last_error = None;
            let current: HashSet<ConversationId> = list.iter().map(|c| c.id.clone()).collect();
            let removed: Vec<ConversationId> = state
                .conversations
                .keys()
                .filter(|id| !current.contains(*id))
                .cloned()
                .collect();
            for id in &removed {
                state.remove(id);
            }
            let mut seeded = Vec::new();
            for conversation in list {
                let id = conversation.id.clone();
                if let Some(count) = state.upsert(&self.inner.me, conversation) {
                    seeded.push((id, count));
                }
            }
            (removed, seeded)
        };

        for id in &removed {
            self.inner.active.clear_if(id);
        }
        tracing::debug!(removed = removed.len(), "conversation list refreshed");
        self.changed();
        for (id, count) in seeded {
            self.unread_changed(&id, count);
        }
        true
    }

    /// Load one conversation into the directory.
    ///
    /// Failures are recorded in [`last_error`](Self::last_error).
    pub async fn fetch(&self, id: &ConversationId) -> Option<Conversation> {
        match self.inner.api.get_conversation(id).await {
            Ok(conversation) => {
                self.state().last_error = None;
                self.absorb(conversation.clone());
                Some(conversation)
            }
            Err(error) => {
                tracing::warn!(conversation = %id, %error, "conversation fetch failed");
                self.state().last_error = Some(error.to_string());
                None
            }
        }
    }

    /// Active (non-archived) conversations, most recent first.
    pub fn list(&self) -> Vec<Conversation> {
        self.state().sorted(&self.inner.me, false)
    }

    /// Archived conversations, most recent first.
    pub fn archived(&self) -> Vec<Conversation> {
        self.state().sorted(&self.inner.me, true)
    }

    pub fn conversation(&self, id: &ConversationId) -> Option<Conversation> {
        self.state().conversations.get(id).cloned()
    }

    /// Unread count for the local user.
    pub fn unread(&self, id: &ConversationId) -> u32 {
        self.state().unread(id)
    }

    /// Unread count across non-archived conversations.
    pub fn total_unread(&self) -> u32 {
        let state = self.state();
        state
            .conversations
            .values()
            .filter(|c| !c.archived)
            .map(|c| state.unread(&c.id))
            .sum()
    }

    /// Number of direct creations in flight.
    pub fn pending_creations(&self) -> usize {
        self.state().pending_direct.len()
    }

    /// The last background failure, if the latest query did not succeed.
    pub fn last_error(&self) -> Option<String> {
        self.state().last_error.clone()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Creation
    // ─────────────────────────────────────────────────────────────────────────

    /// Return the direct conversation with `peer`, creating it if needed.
    ///
    /// Concurrent calls for the same peer issue a single create request and
    /// all observe its result.
    pub async fn get_or_create_direct(&self, peer: &UserId) -> Result<Conversation> {
        let creation = {
            let mut state = self.state();
            if let Some(existing) = state.canonical_direct(&self.inner.me, peer) {
                return Ok(existing.clone());
            }
            match state.pending_direct.get(peer) {
                Some(in_flight) => {
                    tracing::debug!(%peer, "joining in-flight direct creation");
                    in_flight.clone()
                }
                None => {
                    let api = Arc::clone(&self.inner.api);
                    let target = peer.clone();
                    let creation = async move { api.create_direct(&target).await }
                        .boxed()
                        .shared();
                    state.pending_direct.insert(peer.clone(), creation.clone());
                    tracing::debug!(%peer, "creating direct conversation");
                    creation
                }
            }
        };

        let result = creation.clone().await;

        let inserted = {
            let mut state = self.state();
            let ours = state
                .pending_direct
                .get(peer)
                .map_or(false, |registered| Shared::ptr_eq(registered, &creation));
            if ours {
                state.pending_direct.remove(peer);
            }
            match &result {
                Ok(conversation) if !state.conversations.contains_key(&conversation.id) => {
                    state.upsert(&self.inner.me, conversation.clone());
                    true
                }
                _ => false,
            }
        };

        if inserted {
            self.changed();
        }
        result.map_err(Into::into)
    }

    /// Create a group conversation with the given members.
    pub async fn create_group(
        &self,
        name: &str,
        members: Vec<UserId>,
        avatar: Option<String>,
    ) -> Result<Conversation> {
        let group = NewGroup {
            name: name.to_owned(),
            members,
            avatar,
        };
        let conversation = self.inner.api.create_group(&group).await?;
        tracing::info!(conversation = %conversation.id, "group created");
        self.absorb(conversation.clone());
        Ok(conversation)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Read state
    // ─────────────────────────────────────────────────────────────────────────

    /// Mark a conversation read.
    ///
    /// The counter is zeroed once the server confirms, keeping any message
    /// created after this call was issued.
    pub async fn mark_read(&self, id: &ConversationId) -> Result<()> {
        let token = {
            let mut state = self.state();
            state.next_token += 1;
            let token = state.next_token;
            state.unread.entry(id.clone()).or_default().mark = Some(PendingMark {
                token,
                issued_at: now_millis(),
                since: 0,
            });
            token
        };

        let outcome = self.inner.api.mark_read(id).await;

        let count = {
            let mut state = self.state();
            let Some(counter) = state.unread.get_mut(id) else {
                return outcome.map_err(Into::into);
            };
            let mark = match counter.mark {
                Some(mark) if mark.token == token => mark,
                // Superseded by a later mark.
                _ => return outcome.map_err(Into::into),
            };
            counter.mark = None;
            if let Err(error) = outcome {
                tracing::warn!(conversation = %id, %error, "mark read failed");
                return Err(error.into());
            }
            counter.count = mark.since;
            counter.read_through = Some(
                counter
                    .read_through
                    .map_or(mark.issued_at, |at| at.max(mark.issued_at)),
            );
            counter.count
        };

        tracing::debug!(conversation = %id, count, "marked read");
        self.unread_changed(id, count);
        Ok(())
    }

    /// Track a message delivered over the transport.
    ///
    /// Updates the conversation summary and, for a message from someone else
    /// seen for the first time, the unread counter. An unknown conversation is
    /// fetched in the background.
    pub fn on_message(&self, message: &Message, first_seen: bool) {
        let id = &message.conversation_id;
        let (summary_changed, unread) = {
            let mut guard = self.state();
            let state = &mut *guard;
            let Some(conversation) = state.conversations.get_mut(id) else {
                if state.fetching.insert(id.clone()) {
                    self.fetch_unknown(id.clone());
                }
                return;
            };
            let summary_changed = conversation.apply_message(message);

            let mut unread = None;
            if first_seen && message.sender_id != self.inner.me {
                let counter = state.unread.entry(id.clone()).or_default();
                if counter.read_through.map_or(true, |at| message.created_at > at) {
                    counter.count += 1;
                    if let Some(mark) = counter.mark.as_mut() {
                        if message.created_at > mark.issued_at {
                            mark.since += 1;
                        }
                    }
                    unread = Some(counter.count);
                }
            }
            (summary_changed, unread)
        };

        if summary_changed {
            self.changed();
        }
        if let Some(count) = unread {
            self.unread_changed(id, count);
        }
    }

    fn fetch_unknown(&self, id: ConversationId) {
        tracing::debug!(conversation = %id, "message for unknown conversation, fetching");
        let directory = self.clone();
        tokio::spawn(async move {
            directory.fetch(&id).await;
            directory.state().fetching.remove(&id);
        });
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Move a conversation to the archived list.
    pub async fn archive(&self, id: &ConversationId) -> Result<()> {
        self.inner.api.archive(id).await?;
        self.set_archived(id, true);
        self.inner.active.clear_if(id);
        Ok(())
    }

    /// Move a conversation back to the active list.
    pub async fn unarchive(&self, id: &ConversationId) -> Result<()> {
        self.inner.api.unarchive(id).await?;
        self.set_archived(id, false);
        Ok(())
    }

    fn set_archived(&self, id: &ConversationId, archived: bool) {
        if let Some(conversation) = self.state().conversations.get_mut(id) {
            conversation.archived = archived;
        }
        tracing::debug!(conversation = %id, archived, "archive state changed");
        self.changed();
    }

    /// Delete a conversation.
    pub async fn delete(&self, id: &ConversationId) -> Result<()> {
        self.inner.api.delete(id).await?;
        self.forget(id);
        Ok(())
    }

    /// Leave a group conversation.
    pub async fn leave_group(&self, id: &ConversationId) -> Result<()> {
        self.inner.api.leave_group(id).await?;
        self.forget(id);
        Ok(())
    }

    fn forget(&self, id: &ConversationId) {
        self.state().remove(id);
        self.inner.active.clear_if(id);
        tracing::info!(conversation = %id, "conversation removed");
        self.changed();
    }

    pub async fn add_member(&self, id: &ConversationId, user: &UserId) -> Result<Conversation> {
        let conversation = self.inner.api.add_member(id, user).await?;
        self.absorb(conversation.clone());
        Ok(conversation)
    }

    pub async fn remove_member(&self, id: &ConversationId, user: &UserId) -> Result<Conversation> {
        let conversation = self.inner.api.remove_member(id, user).await?;
        self.absorb(conversation.clone());
        Ok(conversation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use huddle_api::{ops, MemoryApi};
    use huddle_core::{ConversationKind, MessageKind, MessageStatus};
    use std::collections::{BTreeMap, BTreeSet};
    use std::time::Duration;

    fn direct(id: &str, a: &str, b: &str, created_at: Timestamp) -> Conversation {
        Conversation {
            id: ConversationId::from(id),
            kind: ConversationKind::Direct,
            participants: [a, b].into_iter().map(UserId::from).collect(),
            name: None,
            avatar: None,
            last_message: None,
            last_message_at: None,
            unread_counts: BTreeMap::new(),
            archived: false,
            created_at,
        }
    }

    fn incoming(conversation: &str, sender: &str, created_at: Timestamp) -> Message {
        Message {
            id: Some(format!("m-{}", created_at).into()),
            cid: None,
            conversation_id: ConversationId::from(conversation),
            sender_id: UserId::from(sender),
            content: "hi".into(),
            kind: MessageKind::Text,
            status: MessageStatus::Sent,
            attachments: vec![],
            reply_to: None,
            read_by: BTreeSet::new(),
            created_at,
            updated_at: created_at,
        }
    }

    fn setup() -> (ConversationDirectory, Arc<MemoryApi>, ActiveConversation) {
        let api = Arc::new(MemoryApi::new("alice"));
        let events = EventBus::new(64);
        let active = ActiveConversation::new(events.clone());
        let directory =
            ConversationDirectory::new(UserId::from("alice"), api.clone(), active.clone(), events);
        (directory, api, active)
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_get_or_create_issues_one_request() {
        let (directory, api, _) = setup();
        api.set_latency(ops::CREATE_DIRECT, Duration::from_millis(500));
        let bob = UserId::from("bob");

        let (a, b) = tokio::join!(
            directory.get_or_create_direct(&bob),
            directory.get_or_create_direct(&bob)
        );

        assert_eq!(a.unwrap().id, b.unwrap().id);
        assert_eq!(api.call_count(ops::CREATE_DIRECT), 1);
        assert_eq!(directory.pending_creations(), 0);
        assert_eq!(directory.list().len(), 1);

        directory.get_or_create_direct(&bob).await.unwrap();
        assert_eq!(api.call_count(ops::CREATE_DIRECT), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shared_failure_then_retry() {
        let (directory, api, _) = setup();
        api.set_latency(ops::CREATE_DIRECT, Duration::from_millis(500));
        api.fail_next(ops::CREATE_DIRECT, ApiError::Network("offline".into()));
        let bob = UserId::from("bob");

        let (a, b) = tokio::join!(
            directory.get_or_create_direct(&bob),
            directory.get_or_create_direct(&bob)
        );
        assert!(matches!(a, Err(EngineError::Api(ApiError::Network(_)))));
        assert_eq!(a, b);
        assert_eq!(directory.pending_creations(), 0);

        assert!(directory.get_or_create_direct(&bob).await.is_ok());
        assert_eq!(api.call_count(ops::CREATE_DIRECT), 2);
    }

    #[tokio::test]
    async fn test_earliest_duplicate_direct_is_canonical() {
        let (directory, api, _) = setup();
        api.seed_conversation(direct("late", "alice", "bob", 20));
        api.seed_conversation(direct("early", "alice", "bob", 10));
        assert!(directory.refresh().await);

        let found = directory.get_or_create_direct(&UserId::from("bob")).await.unwrap();

        assert_eq!(found.id, ConversationId::from("early"));
        assert_eq!(api.call_count(ops::CREATE_DIRECT), 0);
    }

    #[tokio::test]
    async fn test_unread_seeded_and_reset() {
        let (directory, api, _) = setup();
        let mut seeded = direct("c1", "alice", "bob", 0);
        seeded.unread_counts.insert(UserId::from("alice"), 4);
        api.seed_conversation(seeded);
        directory.refresh().await;
        let id = ConversationId::from("c1");
        assert_eq!(directory.unread(&id), 4);

        directory.mark_read(&id).await.unwrap();

        assert_eq!(directory.unread(&id), 0);
        assert_eq!(directory.list()[0].unread_for(&UserId::from("alice")), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_message_after_mark_survives_reset() {
        let (directory, api, _) = setup();
        api.seed_conversation(direct("c1", "alice", "bob", 0));
        directory.refresh().await;
        let id = ConversationId::from("c1");
        api.set_latency(ops::MARK_READ, Duration::from_millis(500));

        let marking = {
            let directory = directory.clone();
            let id = id.clone();
            tokio::spawn(async move { directory.mark_read(&id).await })
        };
        tokio::task::yield_now().await;

        directory.on_message(&incoming("c1", "bob", 1), true);
        directory.on_message(&incoming("c1", "bob", now_millis() + 60_000), true);
        assert_eq!(directory.unread(&id), 2);

        marking.await.unwrap().unwrap();
        assert_eq!(directory.unread(&id), 1);
    }

    #[tokio::test]
    async fn test_own_and_repeated_messages_not_counted() {
        let (directory, api, _) = setup();
        api.seed_conversation(direct("c1", "alice", "bob", 0));
        directory.refresh().await;
        let id = ConversationId::from("c1");

        directory.on_message(&incoming("c1", "alice", 5), true);
        directory.on_message(&incoming("c1", "bob", 6), true);
        directory.on_message(&incoming("c1", "bob", 6), false);

        assert_eq!(directory.unread(&id), 1);
        let summary = directory.conversation(&id).unwrap();
        assert_eq!(summary.last_message_at, Some(6));
    }

    #[tokio::test]
    async fn test_list_sorted_by_recent_activity() {
        let (directory, api, _) = setup();
        api.seed_conversation(direct("old", "alice", "bob", 1));
        api.seed_conversation(direct("new", "alice", "carol", 2));
        directory.refresh().await;

        directory.on_message(&incoming("old", "bob", 10), true);

        let order: Vec<_> = directory.list().into_iter().map(|c| c.id).collect();
        assert_eq!(order, vec![ConversationId::from("old"), ConversationId::from("new")]);
    }

    #[tokio::test]
    async fn test_archive_and_delete_clear_active_pointer() {
        let (directory, api, active) = setup();
        api.seed_conversation(direct("c1", "alice", "bob", 0));
        api.seed_conversation(direct("c2", "alice", "carol", 0));
        directory.refresh().await;
        let (c1, c2) = (ConversationId::from("c1"), ConversationId::from("c2"));

        active.set(Some(c1.clone()));
        directory.archive(&c1).await.unwrap();
        assert_eq!(active.get(), None);
        assert_eq!(directory.archived().len(), 1);
        assert_eq!(directory.list().len(), 1);

        directory.unarchive(&c1).await.unwrap();
        assert_eq!(directory.list().len(), 2);

        active.set(Some(c2.clone()));
        directory.delete(&c2).await.unwrap();
        assert_eq!(active.get(), None);
        assert!(directory.conversation(&c2).is_none());
    }

    #[tokio::test]
    async fn test_group_lifecycle() {
        let (directory, _, active) = setup();

        let group = directory
            .create_group("team", vec![UserId::from("bob")], None)
            .await
            .unwrap();
        assert_eq!(group.kind, ConversationKind::Group);

        let updated = directory.add_member(&group.id, &UserId::from("carol")).await.unwrap();
        assert_eq!(updated.participants.len(), 3);
        assert_eq!(directory.conversation(&group.id).unwrap().participants.len(), 3);

        directory.remove_member(&group.id, &UserId::from("bob")).await.unwrap();

        active.set(Some(group.id.clone()));
        directory.leave_group(&group.id).await.unwrap();
        assert!(directory.conversation(&group.id).is_none());
        assert_eq!(active.get(), None);
    }

    #[tokio::test]
    async fn test_unknown_conversation_fetched_in_background() {
        let (directory, api, _) = setup();
        api.seed_conversation(direct("c9", "alice", "bob", 0));

        directory.on_message(&incoming("c9", "bob", 3), true);
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        assert!(directory.conversation(&ConversationId::from("c9")).is_some());
        assert_eq!(api.call_count(ops::GET_CONVERSATION), 1);
    }

    #[tokio::test]
    async fn test_failed_refresh_records_error() {
        let (directory, api, _) = setup();
        api.fail_next(ops::LIST_CONVERSATIONS, ApiError::Http {
            status: 503,
            message: "unavailable".into(),
        });

        assert!(!directory.refresh().await);
        assert!(directory.last_error().is_some());
        assert!(directory.refresh().await);
        assert!(directory.last_error().is_none());
    }
}
