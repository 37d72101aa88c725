//! ReconnectionSynchronizer: fills the gap left by a connection outage.
//!
//! On every `reconnected` the open conversation's room is re-joined and one
//! delta-sync request is issued, carrying the newest timestamp held locally.
//! A request left unanswered by an earlier connection is superseded.
//! The response is merged through the reconciliation kernel, so a send that
//! was pending during the outage is promoted in place rather than duplicated.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use huddle_core::{ConversationId, Message, Timestamp};
use huddle_transport::OutboundEvent;

use crate::active::ActiveConversation;
use crate::messages::{MergedBatch, MessageSyncEngine};
use crate::outbox::Outbox;

/// Result of handling a delta-sync response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeltaOutcome {
    /// The batch was merged.
    Applied(MergedBatch),
    /// The conversation is no longer open; the batch was dropped.
    Stale,
}

#[derive(Debug, Default)]
struct ReconnectState {
    /// Outstanding requests: conversation -> since timestamp.
    requested: HashMap<ConversationId, Timestamp>,
    reconnects: u64,
}

/// Requests and merges missed messages after a reconnect.
#[derive(Clone)]
pub struct ReconnectionSynchronizer {
    messages: MessageSyncEngine,
    active: ActiveConversation,
    outbox: Outbox,
    state: Arc<Mutex<ReconnectState>>,
}

impl ReconnectionSynchronizer {
    pub fn new(messages: MessageSyncEngine, active: ActiveConversation, outbox: Outbox) -> Self {
        Self {
            messages,
            active,
            outbox,
            state: Arc::new(Mutex::new(ReconnectState::default())),
        }
    }

    fn state(&self) -> MutexGuard<'_, ReconnectState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Handle a `reconnected` event.
    ///
    /// Returns the timestamp the delta was requested from, or `None` when
    /// there was nothing to request (no open conversation or no local history).
    pub fn on_reconnected(&self) -> Option<Timestamp> {
        self.state().reconnects += 1;

        let Some(conversation) = self.active.get() else {
            tracing::debug!("reconnected with no open conversation");
            return None;
        };

        // Room subscriptions do not survive the outage.
        self.outbox.push(OutboundEvent::JoinRoom {
            conversation_id: conversation.clone(),
        });

        let Some(since) = self.messages.last_known_timestamp(&conversation) else {
            tracing::debug!(%conversation, "reconnected with no local history");
            return None;
        };

        // The previous connection's response, if any, is lost with it.
        let previous = self.state().requested.insert(conversation.clone(), since);
        if let Some(previous) = previous {
            tracing::debug!(
                %conversation,
                previous,
                since,
                "superseding unanswered delta request"
            );
        }

        tracing::info!(%conversation, since, "requesting missed messages");
        self.outbox.push(OutboundEvent::DeltaSyncRequest {
            conversation_id: conversation,
            since_timestamp: since,
        });
        Some(since)
    }

    /// Handle a `delta-sync-response` event.
    pub fn on_delta_response(
        &self,
        conversation: &ConversationId,
        since: Timestamp,
        messages: Vec<Message>,
    ) -> DeltaOutcome {
        self.state().requested.remove(conversation);

        if !self.active.is(conversation) {
            tracing::debug!(%conversation, since, "discarding delta for closed conversation");
            return DeltaOutcome::Stale;
        }

        let received = messages.len();
        let merged = self.messages.apply_delta(conversation, messages);
        tracing::info!(
            %conversation,
            since,
            received,
            inserted = merged.report.inserted,
            updated = merged.report.updated,
            "delta merged"
        );
        DeltaOutcome::Applied(merged)
    }

    /// Number of delta requests awaiting a response.
    pub fn outstanding(&self) -> usize {
        self.state().requested.len()
    }

    /// Number of reconnects observed.
    pub fn reconnects(&self) -> u64 {
        self.state().reconnects
    }
}
