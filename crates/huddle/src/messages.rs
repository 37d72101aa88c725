//! MessageSyncEngine: per-conversation message cache and optimistic send pipeline.
//!
//! Every message source funnels through the reconciliation kernel:
//!
//! - history pages ([`MessageSyncEngine::fetch_page`], [`MessageSyncEngine::load_older`])
//! - live `new-message` events, including echoes of our own sends
//! - `message-ack` events
//! - delta-sync responses after a reconnect
//!
//! A send inserts a `sending` record immediately, arms a timeout and queues the
//! transport event. The record is promoted in place when the server confirms
//! its `cid`, or moved to `error` when the timeout elapses or the transport
//! refuses the event.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use huddle_api::{ChatApi, PageCursor, PageQuery};
use huddle_core::{
    merge_into, merge_into_with, now_millis, validate_outgoing, ClientId, ConversationId,
    MergeReport, Message, MessageId, MessageStatus, OutgoingMessage, Timestamp, UserId,
    ValidatedMessage,
};
use huddle_transport::{OutboundEvent, TransportError};

use crate::active::ActiveConversation;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::events::{EngineEvent, EventBus};
use crate::outbox::Outbox;
use crate::timer::Timer;

/// A merged batch and the records it added.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergedBatch {
    pub report: MergeReport,
    /// Records not present before the merge, as they arrived.
    pub inserted: Vec<Message>,
}

/// Result of a history request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The page was merged.
    Applied(MergeReport),
    /// The conversation was closed while the request was in flight.
    Stale,
    /// The request failed. See [`MessageSyncEngine::last_error`].
    Failed,
    /// There is no older history to load.
    Exhausted,
}

/// Why a pending send failed.
enum SendFailure {
    Timeout,
    Transport(TransportError),
}

/// Cached history of one conversation.
#[derive(Debug, Default)]
struct Thread {
    /// Sorted ascending by `created_at`.
    messages: Vec<Message>,
    /// Whether the server has older messages than the oldest we hold.
    has_more: bool,
    /// Whether the newest page has been fetched.
    loaded: bool,
}

#[derive(Default)]
struct SyncState {
    threads: HashMap<ConversationId, Thread>,
    /// Timeout per pending send.
    send_timers: HashMap<ClientId, Timer>,
    /// Correlation ids replaced by a retry.
    retired: HashSet<ClientId>,
    last_error: Option<String>,
}

impl SyncState {
    /// Merge `batch` into a thread and settle the sends it confirmed.
    ///
    /// Returns the merge report and the events to publish.
    fn merge(
        &mut self,
        conversation: &ConversationId,
        batch: Vec<Message>,
    ) -> (MergeReport, Vec<EngineEvent>) {
        let (merged, events) = self.merge_tracked(conversation, batch);
        (merged.report, events)
    }

    /// [`merge`](Self::merge), also returning the records that were added.
    fn merge_tracked(
        &mut self,
        conversation: &ConversationId,
        batch: Vec<Message>,
    ) -> (MergedBatch, Vec<EngineEvent>) {
        let SyncState {
            threads,
            send_timers,
            retired,
            ..
        } = self;

        for cid in batch.iter().filter_map(|m| m.cid.as_ref()) {
            if retired.contains(cid) {
                tracing::warn!(%conversation, %cid, "server delivered a send that was retried");
            }
        }

        let thread = threads.entry(conversation.clone()).or_default();
        let pending: Vec<ClientId> = thread
            .messages
            .iter()
            .filter(|m| m.is_pending())
            .filter_map(|m| m.cid.clone())
            .collect();

        let mut inserted = Vec::new();
        let report = merge_into_with(&mut thread.messages, batch, |m| {
            inserted.push(m.clone());
        });

        let mut events = Vec::new();
        if report.changed() {
            events.push(EngineEvent::MessagesChanged {
                conversation_id: conversation.clone(),
            });
        }
        for cid in pending {
            let Some(record) = thread
                .messages
                .iter()
                .find(|m| m.cid.as_ref() == Some(&cid))
            else {
                continue;
            };
            if record.is_pending() {
                continue;
            }
            if let Some(mut timer) = send_timers.remove(&cid) {
                timer.cancel();
            }
            tracing::debug!(%conversation, %cid, status = %record.status, "send settled");
            events.push(EngineEvent::MessageStatusChanged {
                conversation_id: conversation.clone(),
                cid,
                id: record.id.clone(),
                status: record.status,
            });
        }
        (MergedBatch { report, inserted }, events)
    }
}

struct EngineInner {
    me: UserId,
    api: Arc<dyn ChatApi>,
    outbox: Outbox,
    active: ActiveConversation,
    events: EventBus,
    config: EngineConfig,
    state: Mutex<SyncState>,
}

/// Message cache and send pipeline for every conversation.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct MessageSyncEngine {
    inner: Arc<EngineInner>,
}

impl MessageSyncEngine {
    pub fn new(
        me: UserId,
        api: Arc<dyn ChatApi>,
        outbox: Outbox,
        active: ActiveConversation,
        events: EventBus,
        config: EngineConfig,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                me,
                api,
                outbox,
                active,
                events,
                config,
                state: Mutex::new(SyncState::default()),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, SyncState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, events: Vec<EngineEvent>) {
        for event in events {
            self.inner.events.emit(event);
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // History
    // ─────────────────────────────────────────────────────────────────────────

    /// Fetch one page of history and merge it.
    ///
    /// `None` loads the newest page. A page requested for the open
    /// conversation is dropped if another conversation was opened meanwhile.
    pub async fn fetch_page(
        &self,
        conversation: &ConversationId,
        before: Option<PageCursor>,
    ) -> FetchOutcome {
        let initial = before.is_none();
        let limit = self.inner.config.page_size;
        let query = match before {
            Some(cursor) => PageQuery::before(cursor, limit),
            None => PageQuery::latest(limit),
        };
        let targeted_active = self.inner.active.is(conversation);

        let page = match self.inner.api.get_messages(conversation, &query).await {
            Ok(page) => page,
            Err(error) => {
                tracing::warn!(%conversation, %error, "history fetch failed");
                self.state().last_error = Some(error.to_string());
                return FetchOutcome::Failed;
            }
        };

        if targeted_active && !self.inner.active.is(conversation) {
            tracing::debug!(%conversation, "discarding history page for closed conversation");
            return FetchOutcome::Stale;
        }

        let received = page.messages.len();
        let (report, events) = {
            let mut state = self.state();
            state.last_error = None;
            let merged = state.merge(conversation, page.messages);
            let thread = state.threads.entry(conversation.clone()).or_default();
            if !initial || !thread.loaded {
                thread.has_more = page.has_more;
            }
            thread.loaded = true;
            merged
        };

        tracing::debug!(
            %conversation,
            received,
            inserted = report.inserted,
            has_more = page.has_more,
            "history page merged"
        );
        self.publish(events);
        FetchOutcome::Applied(report)
    }

    /// Fetch the page preceding the oldest acknowledged message.
    ///
    /// Loads the newest page instead if nothing has been loaded yet.
    pub async fn load_older(&self, conversation: &ConversationId) -> FetchOutcome {
        let cursor = {
            let state = self.state();
            match state.threads.get(conversation) {
                Some(thread) if thread.loaded => {
                    if !thread.has_more {
                        return FetchOutcome::Exhausted;
                    }
                    thread
                        .messages
                        .iter()
                        .find_map(|m| m.id.clone())
                        .map(PageCursor::Message)
                }
                _ => None,
            }
        };
        self.fetch_page(conversation, cursor).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Sending
    // ─────────────────────────────────────────────────────────────────────────

    /// Send a message.
    ///
    /// Validates, inserts the optimistic record and queues the transport event
    /// without waiting on the network. Returns the correlation id of this
    /// attempt. Must be called from within a Tokio runtime.
    pub fn send(&self, conversation: &ConversationId, outgoing: OutgoingMessage) -> Result<ClientId> {
        let message = validate_outgoing(outgoing)?;
        Ok(self.dispatch(conversation, ClientId::generate(), message))
    }

    /// Re-send a failed message under a fresh correlation id.
    ///
    /// The failed record is replaced by the new attempt.
    pub fn retry(&self, conversation: &ConversationId, cid: &ClientId) -> Result<ClientId> {
        let message = {
            let mut state = self.state();
            let thread = state
                .threads
                .get_mut(conversation)
                .ok_or_else(|| EngineError::ConversationNotFound(conversation.clone()))?;
            let pos = thread
                .messages
                .iter()
                .position(|m| m.cid.as_ref() == Some(cid))
                .ok_or_else(|| EngineError::MessageNotFound(cid.clone()))?;
            let status = thread.messages[pos].status;
            // A late echo can confirm a timed-out send without reopening it.
            if status != MessageStatus::Error || thread.messages[pos].id.is_some() {
                return Err(EngineError::NotRetryable {
                    cid: cid.clone(),
                    status,
                });
            }
            let record = thread.messages.remove(pos);
            state.retired.insert(cid.clone());
            ValidatedMessage {
                content: record.content,
                kind: record.kind,
                attachments: record.attachments,
                reply_to: record.reply_to,
            }
        };

        let fresh = ClientId::generate();
        tracing::info!(%conversation, retired = %cid, cid = %fresh, "retrying failed send");
        Ok(self.dispatch(conversation, fresh, message))
    }

    fn dispatch(&self, conversation: &ConversationId, cid: ClientId, message: ValidatedMessage) -> ClientId {
        let record = Message::optimistic(
            conversation.clone(),
            self.inner.me.clone(),
            cid.clone(),
            message.content.clone(),
            message.kind,
            message.attachments.clone(),
            message.reply_to.clone(),
            now_millis(),
        );
        let event = OutboundEvent::SendMessage {
            cid: cid.clone(),
            conversation_id: conversation.clone(),
            content: message.content,
            kind: message.kind,
            attachments: message.attachments,
            reply_to: message.reply_to,
        };

        {
            let mut state = self.state();
            let thread = state.threads.entry(conversation.clone()).or_default();
            merge_into(&mut thread.messages, [record]);

            let weak = Arc::downgrade(&self.inner);
            let (target, attempt) = (conversation.clone(), cid.clone());
            let mut timer = Timer::new();
            timer.arm(self.inner.config.send_timeout, async move {
                if let Some(inner) = weak.upgrade() {
                    MessageSyncEngine { inner }.fail_pending(&target, &attempt, SendFailure::Timeout);
                }
            });
            state.send_timers.insert(cid.clone(), timer);
        }

        let weak = Arc::downgrade(&self.inner);
        let (target, attempt) = (conversation.clone(), cid.clone());
        self.inner.outbox.push_with(event, move |error| {
            if let Some(inner) = weak.upgrade() {
                MessageSyncEngine { inner }.fail_pending(&target, &attempt, SendFailure::Transport(error));
            }
        });

        tracing::debug!(%conversation, %cid, "optimistic send queued");
        self.inner.events.emit(EngineEvent::MessagesChanged {
            conversation_id: conversation.clone(),
        });
        cid
    }

    /// Move a still-pending send to `error`.
    fn fail_pending(&self, conversation: &ConversationId, cid: &ClientId, cause: SendFailure) {
        let failed = {
            let mut state = self.state();
            if let Some(mut timer) = state.send_timers.remove(cid) {
                match cause {
                    // The timer is the caller.
                    SendFailure::Timeout => timer.release(),
                    SendFailure::Transport(_) => {
                        timer.cancel();
                    }
                }
            }
            let record = state
                .threads
                .get_mut(conversation)
                .and_then(|t| t.messages.iter_mut().find(|m| m.cid.as_ref() == Some(cid)));
            match record {
                Some(record) if record.is_pending() => {
                    record.status = MessageStatus::Error;
                    true
                }
                _ => false,
            }
        };
        if !failed {
            return;
        }

        match &cause {
            SendFailure::Timeout => {
                tracing::warn!(%conversation, %cid, "send timed out without acknowledgment")
            }
            SendFailure::Transport(error) => {
                tracing::warn!(%conversation, %cid, %error, "send rejected by transport")
            }
        }
        self.inner.events.emit(EngineEvent::MessageStatusChanged {
            conversation_id: conversation.clone(),
            cid: cid.clone(),
            id: None,
            status: MessageStatus::Error,
        });
        self.inner.events.emit(EngineEvent::MessagesChanged {
            conversation_id: conversation.clone(),
        });
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Inbound
    // ─────────────────────────────────────────────────────────────────────────

    /// Reconcile a `new-message` event.
    pub fn on_inbound(&self, message: Message) -> MergeReport {
        let conversation = message.conversation_id.clone();
        let (report, events) = self.state().merge(&conversation, vec![message]);
        self.publish(events);
        report
    }

    /// Promote a pending send confirmed by a `message-ack` event.
    ///
    /// Returns false if no local record carries `cid`.
    pub fn on_ack(
        &self,
        conversation: &ConversationId,
        cid: &ClientId,
        id: MessageId,
        created_at: Timestamp,
    ) -> bool {
        let (found, events) = {
            let mut state = self.state();
            let confirmed = state.threads.get(conversation).and_then(|t| {
                t.messages
                    .iter()
                    .find(|m| m.cid.as_ref() == Some(cid))
                    .cloned()
            });
            match confirmed {
                Some(mut confirmed) => {
                    confirmed.id = Some(id);
                    confirmed.status = MessageStatus::Sent;
                    confirmed.created_at = created_at;
                    confirmed.updated_at = created_at;
                    let (_, events) = state.merge(conversation, vec![confirmed]);
                    (true, events)
                }
                None => (false, Vec::new()),
            }
        };
        if !found {
            tracing::debug!(%conversation, %cid, "ack for unknown send");
        }
        self.publish(events);
        found
    }

    /// Merge a delta-sync batch.
    pub fn apply_delta(&self, conversation: &ConversationId, messages: Vec<Message>) -> MergedBatch {
        let (merged, events) = self.state().merge_tracked(conversation, messages);
        self.publish(events);
        merged
    }

    /// Record that `user` has read the given messages.
    ///
    /// Returns the number of records that changed.
    pub fn mark_read_by(&self, conversation: &ConversationId, user: &UserId, ids: &[MessageId]) -> usize {
        let changed = {
            let mut state = self.state();
            let Some(thread) = state.threads.get_mut(conversation) else {
                return 0;
            };
            thread
                .messages
                .iter_mut()
                .filter(|m| m.id.as_ref().map_or(false, |id| ids.contains(id)))
                .map(|m| m.read_by.insert(user.clone()))
                .filter(|inserted| *inserted)
                .count()
        };
        if changed > 0 {
            self.inner.events.emit(EngineEvent::MessagesChanged {
                conversation_id: conversation.clone(),
            });
        }
        changed
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    /// The ordered message list of a conversation.
    pub fn messages(&self, conversation: &ConversationId) -> Vec<Message> {
        self.state()
            .threads
            .get(conversation)
            .map(|t| t.messages.clone())
            .unwrap_or_default()
    }

    /// The local record for one send attempt.
    pub fn message_by_cid(&self, conversation: &ConversationId, cid: &ClientId) -> Option<Message> {
        self.state().threads.get(conversation).and_then(|t| {
            t.messages
                .iter()
                .find(|m| m.cid.as_ref() == Some(cid))
                .cloned()
        })
    }

    /// Whether older history may exist on the server.
    pub fn has_more(&self, conversation: &ConversationId) -> bool {
        self.state()
            .threads
            .get(conversation)
            .map_or(true, |t| !t.loaded || t.has_more)
    }

    /// Whether the newest page has been loaded.
    pub fn is_loaded(&self, conversation: &ConversationId) -> bool {
        self.state()
            .threads
            .get(conversation)
            .map_or(false, |t| t.loaded)
    }

    /// Timestamp to resume from after an outage.
    ///
    /// The newest acknowledged message, else the newest record of any kind.
    pub fn last_known_timestamp(&self, conversation: &ConversationId) -> Option<Timestamp> {
        let state = self.state();
        let thread = state.threads.get(conversation)?;
        thread
            .messages
            .iter()
            .rev()
            .find(|m| m.is_acknowledged())
            .or_else(|| thread.messages.last())
            .map(|m| m.created_at)
    }

    /// Number of sends waiting for the server.
    pub fn pending_sends(&self) -> usize {
        self.state().send_timers.len()
    }

    /// The last background failure, if the latest request did not succeed.
    pub fn last_error(&self) -> Option<String> {
        self.state().last_error.clone()
    }

    /// Drop the cached history of a conversation.
    pub fn clear(&self, conversation: &ConversationId) {
        if self.state().threads.remove(conversation).is_some() {
            self.inner.events.emit(EngineEvent::MessagesChanged {
                conversation_id: conversation.clone(),
            });
        }
    }
}
