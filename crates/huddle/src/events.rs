//! Observer interface for the rendering layer.
//!
//! Components publish an [`EngineEvent`] after every state change they make.
//! Events carry just enough to know what to re-read; the state itself is read
//! through the component accessors.

use tokio::sync::broadcast;

use huddle_core::{ClientId, ConversationId, MessageId, MessageStatus, UserId};

/// A change notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// A conversation's message list changed.
    MessagesChanged { conversation_id: ConversationId },

    /// One of our sends changed status.
    MessageStatusChanged {
        conversation_id: ConversationId,
        cid: ClientId,
        id: Option<MessageId>,
        status: MessageStatus,
    },

    /// The conversation list changed (membership, order, archive state).
    ConversationsChanged,

    /// A conversation's unread counter changed.
    UnreadChanged {
        conversation_id: ConversationId,
        count: u32,
    },

    /// The set of peers typing in a conversation changed.
    TypingChanged {
        conversation_id: ConversationId,
        peers: Vec<UserId>,
    },

    /// The open conversation changed.
    ActiveConversationChanged {
        conversation_id: Option<ConversationId>,
    },
}

/// Broadcast channel shared by every component.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn emit(&self, event: EngineEvent) {
        tracing::trace!(?event, "engine event");
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();

        bus.emit(EngineEvent::ConversationsChanged);

        assert_eq!(rx.recv().await.unwrap(), EngineEvent::ConversationsChanged);
    }

    #[test]
    fn test_emit_without_subscribers() {
        let bus = EventBus::new(8);
        bus.emit(EngineEvent::ConversationsChanged);
    }
}
