//! The open-conversation pointer.
//!
//! Shared by every component: asynchronous results check it to decide
//! whether they are stale, and removing a conversation clears it.

use std::sync::{Arc, PoisonError, RwLock};

use huddle_core::ConversationId;

use crate::events::{EngineEvent, EventBus};

/// Which conversation the user currently has open, if any.
#[derive(Debug, Clone)]
pub struct ActiveConversation {
    slot: Arc<RwLock<Option<ConversationId>>>,
    events: EventBus,
}

impl ActiveConversation {
    pub fn new(events: EventBus) -> Self {
        Self {
            slot: Arc::new(RwLock::new(None)),
            events,
        }
    }

    pub fn get(&self) -> Option<ConversationId> {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Check if `id` is the open conversation.
    pub fn is(&self, id: &ConversationId) -> bool {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            == Some(id)
    }

    /// Replace the pointer, returning the previous value.
    pub fn set(&self, id: Option<ConversationId>) -> Option<ConversationId> {
        let previous = {
            let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *slot, id.clone())
        };
        if previous != id {
            self.events.emit(EngineEvent::ActiveConversationChanged {
                conversation_id: id,
            });
        }
        previous
    }

    /// Clear the pointer if it names `id`. Returns whether it did.
    pub fn clear_if(&self, id: &ConversationId) -> bool {
        let cleared = {
            let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
            if slot.as_ref() == Some(id) {
                *slot = None;
                true
            } else {
                false
            }
        };
        if cleared {
            tracing::debug!(conversation = %id, "active conversation cleared");
            self.events.emit(EngineEvent::ActiveConversationChanged {
                conversation_id: None,
            });
        }
        cleared
    }
}
