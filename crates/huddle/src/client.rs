//! ChatClient: the engine facade consumed by the rendering layer.
//!
//! Owns one of each component, routes every inbound transport event to the
//! component responsible for it, and sequences the multi-component actions
//! (opening a conversation, sending, removing a conversation).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use huddle_api::ChatApi;
use huddle_core::{same_message, ClientId, Conversation, ConversationId, OutgoingMessage, UserId};
use huddle_transport::{InboundEvent, OutboundEvent, Transport, TransportError};

use crate::active::ActiveConversation;
use crate::config::EngineConfig;
use crate::directory::ConversationDirectory;
use crate::error::Result;
use crate::events::{EngineEvent, EventBus};
use crate::messages::{FetchOutcome, MessageSyncEngine};
use crate::outbox::Outbox;
use crate::reconnect::{DeltaOutcome, ReconnectionSynchronizer};
use crate::typing::TypingCoordinator;

/// The conversation sync engine for one signed-in user.
///
/// Must be created within a Tokio runtime. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ChatClient {
    me: UserId,
    transport: Arc<dyn Transport>,
    events: EventBus,
    active: ActiveConversation,
    outbox: Outbox,
    messages: MessageSyncEngine,
    typing: TypingCoordinator,
    directory: ConversationDirectory,
    reconnect: ReconnectionSynchronizer,
    online: Arc<AtomicBool>,
}

impl ChatClient {
    /// Create a client. The local user is the one the transport is
    /// authenticated as.
    pub fn new(api: Arc<dyn ChatApi>, transport: Arc<dyn Transport>, config: EngineConfig) -> Self {
        let me = transport.local_user();
        let events = EventBus::new(config.event_buffer);
        let active = ActiveConversation::new(events.clone());
        let outbox = Outbox::start(Arc::clone(&transport));

        let messages = MessageSyncEngine::new(
            me.clone(),
            Arc::clone(&api),
            outbox.clone(),
            active.clone(),
            events.clone(),
            config.clone(),
        );
        let typing = TypingCoordinator::new(me.clone(), outbox.clone(), events.clone(), config);
        let directory = ConversationDirectory::new(me.clone(), api, active.clone(), events.clone());
        let reconnect = ReconnectionSynchronizer::new(messages.clone(), active.clone(), outbox.clone());
        let online = Arc::new(AtomicBool::new(transport.is_connected()));

        Self {
            me,
            transport,
            events,
            active,
            outbox,
            messages,
            typing,
            directory,
            reconnect,
            online,
        }
    }

    pub fn me(&self) -> &UserId {
        &self.me
    }

    /// Subscribe to change notifications.
    pub fn events(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub fn messages(&self) -> &MessageSyncEngine {
        &self.messages
    }

    pub fn typing(&self) -> &TypingCoordinator {
        &self.typing
    }

    pub fn directory(&self) -> &ConversationDirectory {
        &self.directory
    }

    pub fn reconnect(&self) -> &ReconnectionSynchronizer {
        &self.reconnect
    }

    /// The open conversation.
    pub fn active_conversation(&self) -> Option<ConversationId> {
        self.active.get()
    }

    /// Whether the transport connection is up, as last reported.
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Wait until queued transport events have been emitted.
    pub async fn flush(&self) {
        self.outbox.flush().await;
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Conversation lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Open a conversation: subscribe to its room and load its newest page.
    ///
    /// The previously open conversation is left first.
    pub async fn open_conversation(&self, id: &ConversationId) -> FetchOutcome {
        let previous = self.active.set(Some(id.clone()));
        if let Some(previous) = previous.filter(|p| p != id) {
            self.leave_room(&previous);
        }
        self.outbox.push(OutboundEvent::JoinRoom {
            conversation_id: id.clone(),
        });
        tracing::debug!(conversation = %id, "conversation opened");
        self.messages.fetch_page(id, None).await
    }

    /// Close the open conversation, if any.
    pub fn close_conversation(&self) -> Option<ConversationId> {
        let closed = self.active.set(None)?;
        self.leave_room(&closed);
        tracing::debug!(conversation = %closed, "conversation closed");
        Some(closed)
    }

    fn leave_room(&self, id: &ConversationId) {
        self.typing.clear_conversation(id);
        self.outbox.push(OutboundEvent::LeaveRoom {
            conversation_id: id.clone(),
        });
    }

    /// Resolve `peer` to a direct conversation, creating it if needed.
    pub async fn get_or_create_direct(&self, peer: &UserId) -> Result<Conversation> {
        self.directory.get_or_create_direct(peer).await
    }

    pub async fn mark_read(&self, id: &ConversationId) -> Result<()> {
        self.directory.mark_read(id).await
    }

    /// Archive a conversation, leaving its room if it was open.
    pub async fn archive(&self, id: &ConversationId) -> Result<()> {
        let was_open = self.active.is(id);
        self.directory.archive(id).await?;
        if was_open {
            self.leave_room(id);
        }
        Ok(())
    }

    pub async fn unarchive(&self, id: &ConversationId) -> Result<()> {
        self.directory.unarchive(id).await
    }

    /// Delete a conversation and drop its cached history.
    pub async fn delete(&self, id: &ConversationId) -> Result<()> {
        let was_open = self.active.is(id);
        self.directory.delete(id).await?;
        if was_open {
            self.leave_room(id);
        }
        self.messages.clear(id);
        Ok(())
    }

    /// Leave a group and drop its cached history.
    pub async fn leave_group(&self, id: &ConversationId) -> Result<()> {
        let was_open = self.active.is(id);
        self.directory.leave_group(id).await?;
        if was_open {
            self.leave_room(id);
        }
        self.messages.clear(id);
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Input
    // ─────────────────────────────────────────────────────────────────────────

    /// Send a message. Stops local typing in the conversation.
    pub fn send(&self, conversation: &ConversationId, message: OutgoingMessage) -> Result<ClientId> {
        let cid = self.messages.send(conversation, message)?;
        self.typing.stop_typing(conversation);
        Ok(cid)
    }

    pub fn retry(&self, conversation: &ConversationId, cid: &ClientId) -> Result<ClientId> {
        self.messages.retry(conversation, cid)
    }

    pub fn start_typing(&self, conversation: &ConversationId) {
        self.typing.start_typing(conversation);
    }

    pub fn stop_typing(&self, conversation: &ConversationId) -> bool {
        self.typing.stop_typing(conversation)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Inbound
    // ─────────────────────────────────────────────────────────────────────────

    /// Apply one inbound transport event.
    pub fn handle_inbound(&self, event: InboundEvent) {
        match event {
            InboundEvent::NewMessage(message) => {
                let report = self.messages.on_inbound(message.clone());
                self.directory.on_message(&message, report.inserted > 0);
                // A message ends its sender's typing indicator.
                self.typing
                    .on_remote_stop(&message.conversation_id, &message.sender_id);
            }
            InboundEvent::MessageAck {
                conversation_id,
                cid,
                id,
                created_at,
            } => {
                self.messages.on_ack(&conversation_id, &cid, id, created_at);
            }
            InboundEvent::MessagesRead {
                conversation_id,
                user_id,
                message_ids,
            } => {
                self.messages
                    .mark_read_by(&conversation_id, &user_id, &message_ids);
            }
            InboundEvent::TypingStart {
                conversation_id,
                user_id,
            } => self.typing.on_remote_start(&conversation_id, &user_id),
            InboundEvent::TypingStop {
                conversation_id,
                user_id,
            } => self.typing.on_remote_stop(&conversation_id, &user_id),
            InboundEvent::DeltaSyncResponse {
                conversation_id,
                since_timestamp,
                messages,
            } => {
                let received = messages.clone();
                let outcome =
                    self.reconnect
                        .on_delta_response(&conversation_id, since_timestamp, messages);
                let DeltaOutcome::Applied(merged) = outcome else {
                    return;
                };
                for message in &merged.inserted {
                    self.directory.on_message(message, true);
                }
                // Records already held still refresh the summary, without counting.
                for message in received
                    .iter()
                    .filter(|m| !merged.inserted.iter().any(|i| same_message(i, m)))
                {
                    self.directory.on_message(message, false);
                }
            }
            InboundEvent::Disconnected => {
                tracing::info!("transport disconnected");
                self.online.store(false, Ordering::SeqCst);
            }
            InboundEvent::Reconnected => {
                tracing::info!("transport reconnected");
                self.online.store(true, Ordering::SeqCst);
                self.reconnect.on_reconnected();
            }
        }
    }

    /// Receive and apply inbound events until the transport closes.
    pub async fn run(&self) -> Result<()> {
        loop {
            match self.transport.recv().await {
                Ok(event) => self.handle_inbound(event),
                Err(TransportError::Closed) => {
                    tracing::info!("transport closed, stopping event loop");
                    return Ok(());
                }
                Err(error) => {
                    tracing::warn!(%error, "dropping undecodable inbound frame");
                }
            }
        }
    }

    /// Run the event loop on a background task.
    pub fn spawn(&self) -> JoinHandle<Result<()>> {
        let client = self.clone();
        tokio::spawn(async move { client.run().await })
    }
}
