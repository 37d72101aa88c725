//! Test fixtures: a client wired to an in-memory server and relay.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use huddle::{ChatClient, EngineConfig};
use huddle_api::MemoryApi;
use huddle_core::{
    ClientId, Conversation, ConversationId, ConversationKind, Message, MessageId, MessageKind,
    MessageStatus, Timestamp, UserId,
};
use huddle_transport::{InboundEvent, MemoryRelay, MemoryTransport, OutboundEvent, Transport};
use tracing_subscriber::filter::LevelFilter;

/// Route engine logs to the test writer. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(LevelFilter::DEBUG)
        .try_init();
}

/// A [`ChatClient`] for one user, backed by a [`MemoryApi`] server and a
/// [`MemoryRelay`] connection.
///
/// Inbound events are applied synchronously by [`TestHarness::pump`], so
/// tests control exactly when the client observes the network.
pub struct TestHarness {
    pub me: UserId,
    pub api: Arc<MemoryApi>,
    pub relay: Arc<MemoryRelay>,
    pub transport: Arc<MemoryTransport>,
    pub client: ChatClient,
}

impl TestHarness {
    /// Create a harness for `me` with the default engine configuration.
    pub async fn new(me: &str) -> Self {
        Self::with_config(me, EngineConfig::default()).await
    }

    /// Create a harness with a custom engine configuration.
    pub async fn with_config(me: &str, config: EngineConfig) -> Self {
        let me = UserId::from(me);
        let api = Arc::new(MemoryApi::new(me.clone()));
        let relay = MemoryRelay::new();
        let transport = Arc::new(relay.connect(me.clone()).await);
        let client = ChatClient::new(api.clone(), transport.clone(), config);
        Self {
            me,
            api,
            relay,
            transport,
            client,
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Server state
    // ─────────────────────────────────────────────────────────────────────────

    /// Seed a direct conversation between `me` and `peer` on the server.
    pub fn seed_direct(&self, id: &str, peer: &str) -> ConversationId {
        self.seed(id, ConversationKind::Direct, None, &[peer])
    }

    /// Seed a group conversation containing `me` and `members`.
    pub fn seed_group(&self, id: &str, name: &str, members: &[&str]) -> ConversationId {
        self.seed(id, ConversationKind::Group, Some(name), members)
    }

    fn seed(
        &self,
        id: &str,
        kind: ConversationKind,
        name: Option<&str>,
        others: &[&str],
    ) -> ConversationId {
        let id = ConversationId::from(id);
        let mut participants: BTreeSet<UserId> =
            others.iter().copied().map(UserId::from).collect();
        participants.insert(self.me.clone());
        self.api.seed_conversation(Conversation {
            id: id.clone(),
            kind,
            participants,
            name: name.map(str::to_owned),
            avatar: None,
            last_message: None,
            last_message_at: None,
            unread_counts: BTreeMap::new(),
            archived: false,
            created_at: 0,
        });
        id
    }

    /// Seed one server message from `sender` per timestamp.
    ///
    /// Ids are `m{t}` so tests can name them.
    pub fn seed_history(
        &self,
        conversation: &ConversationId,
        sender: &str,
        times: impl IntoIterator<Item = Timestamp>,
    ) {
        let messages = times
            .into_iter()
            .map(|t| server_message(conversation, &format!("m{t}"), None, sender, t))
            .collect();
        self.api.seed_messages(conversation, messages);
    }

    /// Accept a send from this client on the server, as the server would on
    /// receiving its `send-message`, and return the echo.
    pub fn accept_own(
        &self,
        conversation: &ConversationId,
        cid: &ClientId,
        at: Option<Timestamp>,
    ) -> Message {
        self.api
            .accept_message(conversation, &self.me, Some(cid.clone()), "echo", at)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Network
    // ─────────────────────────────────────────────────────────────────────────

    /// Push an event to this client and apply everything pending.
    ///
    /// Returns false if the connection is offline and nothing was delivered.
    pub async fn deliver(&self, event: InboundEvent) -> bool {
        let delivered = self.relay.push(&self.me, event).await.unwrap_or(false);
        self.pump().await;
        delivered
    }

    /// Apply every inbound event already waiting on the connection.
    pub async fn pump(&self) -> usize {
        let mut applied = 0;
        while let Ok(Some(event)) = self.transport.recv_timeout(Duration::ZERO).await {
            self.client.handle_inbound(event);
            applied += 1;
        }
        applied
    }

    /// Drop the connection and let the client observe it.
    pub async fn go_offline(&self) {
        let _ = self.relay.set_online(&self.me, false).await;
        self.pump().await;
    }

    /// Restore the connection and let the client observe it.
    pub async fn go_online(&self) {
        let _ = self.relay.set_online(&self.me, true).await;
        self.pump().await;
    }

    /// Events the server has received from this client since the last call.
    pub async fn sent(&self) -> Vec<OutboundEvent> {
        self.client.flush().await;
        self.relay.take_outbound(&self.me).await
    }

    /// Messages the client currently shows for `conversation`.
    pub fn messages(&self, conversation: &ConversationId) -> Vec<Message> {
        self.client.messages().messages(conversation)
    }
}

/// Build a server record.
pub fn server_message(
    conversation: &ConversationId,
    id: &str,
    cid: Option<&str>,
    sender: &str,
    created_at: Timestamp,
) -> Message {
    Message {
        id: Some(MessageId::from(id)),
        cid: cid.map(ClientId::from),
        conversation_id: conversation.clone(),
        sender_id: UserId::from(sender),
        content: format!("message {id}"),
        kind: MessageKind::Text,
        status: MessageStatus::Sent,
        attachments: vec![],
        reply_to: None,
        read_by: Default::default(),
        created_at,
        updated_at: created_at,
    }
}

/// The `created_at` of each message, in list order.
pub fn timestamps(messages: &[Message]) -> Vec<Timestamp> {
    messages.iter().map(|m| m.created_at).collect()
}
