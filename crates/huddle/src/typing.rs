//! TypingCoordinator: ephemeral typing state.
//!
//! Local side: `start_typing` emits `typing-start` and (re)arms one auto-stop
//! timer per conversation. When the timer elapses exactly one `typing-stop`
//! is emitted.
//!
//! Remote side: peers signaled as typing are held per conversation, each with
//! its own expiry so a lost `typing-stop` cannot leave a peer typing forever.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use huddle_core::{ConversationId, UserId};
use huddle_transport::OutboundEvent;

use crate::config::EngineConfig;
use crate::events::{EngineEvent, EventBus};
use crate::outbox::Outbox;
use crate::timer::Timer;

struct Armed {
    generation: u64,
    timer: Timer,
}

#[derive(Default)]
struct TypingState {
    /// Conversations the local user is typing in.
    local: HashMap<ConversationId, Armed>,
    /// Peers typing, per conversation.
    remote: HashMap<ConversationId, BTreeMap<UserId, Armed>>,
    /// Incremented on every arming.
    generation: u64,
}

impl TypingState {
    fn next_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    fn peers(&self, conversation: &ConversationId) -> Vec<UserId> {
        self.remote
            .get(conversation)
            .map(|peers| peers.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Remove a remote entry, pruning the conversation when it empties.
    fn remove_peer(&mut self, conversation: &ConversationId, user: &UserId) -> Option<Armed> {
        let peers = self.remote.get_mut(conversation)?;
        let removed = peers.remove(user);
        if peers.is_empty() {
            self.remote.remove(conversation);
        }
        removed
    }
}

struct TypingInner {
    me: UserId,
    outbox: Outbox,
    events: EventBus,
    config: EngineConfig,
    state: Mutex<TypingState>,
}

/// Broadcasts local typing and collects remote typing.
#[derive(Clone)]
pub struct TypingCoordinator {
    inner: Arc<TypingInner>,
}

impl TypingCoordinator {
    pub fn new(me: UserId, outbox: Outbox, events: EventBus, config: EngineConfig) -> Self {
        Self {
            inner: Arc::new(TypingInner {
                me,
                outbox,
                events,
                config,
                state: Mutex::new(TypingState::default()),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, TypingState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Local typing
    // ─────────────────────────────────────────────────────────────────────────

    /// Signal that the local user is typing.
    ///
    /// Emits `typing-start` and resets the auto-stop timer.
    pub fn start_typing(&self, conversation: &ConversationId) {
        let mut state = self.state();
        let generation = state.next_generation();

        let weak = Arc::downgrade(&self.inner);
        let target = conversation.clone();
        let entry = state
            .local
            .entry(conversation.clone())
            .or_insert_with(|| Armed {
                generation,
                timer: Timer::new(),
            });
        entry.generation = generation;
        entry.timer.arm(self.inner.config.typing_timeout, async move {
            if let Some(inner) = weak.upgrade() {
                TypingCoordinator { inner }.auto_stop(&target, generation);
            }
        });

        // Queued under the lock so start/stop emissions keep their order.
        self.inner.outbox.push(OutboundEvent::TypingStart {
            conversation_id: conversation.clone(),
        });
    }

    /// Signal that the local user stopped typing.
    ///
    /// Emits `typing-stop` only if typing was active. Returns whether it was.
    pub fn stop_typing(&self, conversation: &ConversationId) -> bool {
        let mut state = self.state();
        let Some(mut armed) = state.local.remove(conversation) else {
            return false;
        };
        armed.timer.cancel();
        self.inner.outbox.push(OutboundEvent::TypingStop {
            conversation_id: conversation.clone(),
        });
        true
    }

    fn auto_stop(&self, conversation: &ConversationId, generation: u64) {
        let mut state = self.state();
        match state.local.get(conversation) {
            Some(armed) if armed.generation == generation => {}
            _ => return,
        }
        if let Some(mut armed) = state.local.remove(conversation) {
            armed.timer.release();
        }
        tracing::debug!(%conversation, "typing auto-stopped");
        self.inner.outbox.push(OutboundEvent::TypingStop {
            conversation_id: conversation.clone(),
        });
    }

    /// Check if the local user is typing in `conversation`.
    pub fn is_typing(&self, conversation: &ConversationId) -> bool {
        self.state().local.contains_key(conversation)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Remote typing
    // ─────────────────────────────────────────────────────────────────────────

    /// Handle a peer's `typing-start`.
    ///
    /// Signals about the local user (from another device) are ignored.
    pub fn on_remote_start(&self, conversation: &ConversationId, user: &UserId) {
        if user == &self.inner.me {
            return;
        }
        let peers = {
            let mut state = self.state();
            let generation = state.next_generation();
            let weak = Arc::downgrade(&self.inner);
            let (target, peer) = (conversation.clone(), user.clone());

            let peers = state.remote.entry(conversation.clone()).or_default();
            let added = !peers.contains_key(user);
            let entry = peers.entry(user.clone()).or_insert_with(|| Armed {
                generation,
                timer: Timer::new(),
            });
            entry.generation = generation;
            entry.timer.arm(self.inner.config.remote_typing_expiry, async move {
                if let Some(inner) = weak.upgrade() {
                    TypingCoordinator { inner }.expire_remote(&target, &peer, generation);
                }
            });

            if !added {
                return;
            }
            state.peers(conversation)
        };
        self.publish(conversation, peers);
    }

    /// Handle a peer's `typing-stop`.
    pub fn on_remote_stop(&self, conversation: &ConversationId, user: &UserId) {
        let peers = {
            let mut state = self.state();
            if state.remove_peer(conversation, user).is_none() {
                return;
            }
            state.peers(conversation)
        };
        self.publish(conversation, peers);
    }

    fn expire_remote(&self, conversation: &ConversationId, user: &UserId, generation: u64) {
        let peers = {
            let mut state = self.state();
            let current = state
                .remote
                .get(conversation)
                .and_then(|peers| peers.get(user))
                .map(|armed| armed.generation);
            if current != Some(generation) {
                return;
            }
            if let Some(mut armed) = state.remove_peer(conversation, user) {
                armed.timer.release();
            }
            state.peers(conversation)
        };
        tracing::debug!(%conversation, %user, "remote typing expired");
        self.publish(conversation, peers);
    }

    /// Peers currently typing in `conversation`, sorted.
    pub fn typing_peers(&self, conversation: &ConversationId) -> Vec<UserId> {
        self.state().peers(conversation)
    }

    /// Stop local typing and forget remote typing for a conversation.
    pub fn clear_conversation(&self, conversation: &ConversationId) {
        self.stop_typing(conversation);
        let had_peers = self.state().remote.remove(conversation).is_some();
        if had_peers {
            self.publish(conversation, Vec::new());
        }
    }

    fn publish(&self, conversation: &ConversationId, peers: Vec<UserId>) {
        self.inner.events.emit(EngineEvent::TypingChanged {
            conversation_id: conversation.clone(),
            peers,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use huddle_transport::{MemoryRelay, Transport};
    use std::time::Duration;

    struct Setup {
        typing: TypingCoordinator,
        outbox: Outbox,
        relay: Arc<MemoryRelay>,
        conversation: ConversationId,
    }

    async fn setup() -> Setup {
        let relay = MemoryRelay::new();
        let transport: Arc<dyn Transport> = Arc::new(relay.connect("alice").await);
        let outbox = Outbox::start(transport);
        let typing = TypingCoordinator::new(
            UserId::from("alice"),
            outbox.clone(),
            EventBus::new(64),
            EngineConfig::default(),
        );
        Setup {
            typing,
            outbox,
            relay,
            conversation: ConversationId::from("c1"),
        }
    }

    impl Setup {
        async fn emitted(&self) -> Vec<OutboundEvent> {
            self.outbox.flush().await;
            self.relay.take_outbound(&UserId::from("alice")).await
        }

        fn stops(events: &[OutboundEvent]) -> usize {
            events
                .iter()
                .filter(|e| matches!(e, OutboundEvent::TypingStop { .. }))
                .count()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_stop_emits_exactly_once() {
        let s = setup().await;

        s.typing.start_typing(&s.conversation);
        tokio::time::sleep(Duration::from_secs(10)).await;

        let events = s.emitted().await;
        assert_eq!(events.len(), 2);
        assert_eq!(Setup::stops(&events), 1);
        assert!(!s.typing.is_typing(&s.conversation));
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_start_debounces_stop() {
        let s = setup().await;

        for _ in 0..4 {
            s.typing.start_typing(&s.conversation);
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        assert!(s.typing.is_typing(&s.conversation));
        tokio::time::sleep(Duration::from_secs(10)).await;

        let events = s.emitted().await;
        assert_eq!(events.len(), 5);
        assert_eq!(Setup::stops(&events), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_stop_cancels_timer() {
        let s = setup().await;

        s.typing.start_typing(&s.conversation);
        assert!(s.typing.stop_typing(&s.conversation));
        assert!(!s.typing.stop_typing(&s.conversation));
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(Setup::stops(&s.emitted().await), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_typing_expires() {
        let s = setup().await;
        let bob = UserId::from("bob");

        s.typing.on_remote_start(&s.conversation, &bob);
        assert_eq!(s.typing.typing_peers(&s.conversation), vec![bob.clone()]);

        tokio::time::sleep(Duration::from_secs(5)).await;
        s.typing.on_remote_start(&s.conversation, &bob);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(s.typing.typing_peers(&s.conversation), vec![bob]);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(s.typing.typing_peers(&s.conversation).is_empty());
    }

    #[tokio::test]
    async fn test_remote_stop_and_self_ignored() {
        let s = setup().await;
        let bob = UserId::from("bob");

        s.typing.on_remote_start(&s.conversation, &UserId::from("alice"));
        s.typing.on_remote_start(&s.conversation, &bob);
        assert_eq!(s.typing.typing_peers(&s.conversation), vec![bob.clone()]);

        s.typing.on_remote_stop(&s.conversation, &bob);
        assert!(s.typing.typing_peers(&s.conversation).is_empty());
    }
}
