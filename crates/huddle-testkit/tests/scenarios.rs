//! End-to-end scenarios: a client against the in-memory server and relay.

use std::collections::BTreeSet;
use std::time::Duration;

use huddle::{EngineConfig, EngineEvent, FetchOutcome};
use huddle_api::{ops, PageCursor};
use huddle_core::{is_ordered, now_millis, MessageStatus, OutgoingMessage, UserId};
use huddle_testkit::{init_tracing, server_message, timestamps, TestHarness};
use huddle_transport::{InboundEvent, OutboundEvent};

// ─────────────────────────────────────────────────────────────────────────────
// Reconciliation across the network
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn offline_send_is_promoted_by_reconnect_delta() {
    init_tracing();
    let h = TestHarness::new("alice").await;
    let conversation = h.seed_direct("c1", "bob");
    h.client.open_conversation(&conversation).await;
    h.sent().await;

    h.go_offline().await;
    let cid = h
        .client
        .send(&conversation, OutgoingMessage::text("hello"))
        .unwrap();
    h.client.flush().await;

    let local = h.client.messages().message_by_cid(&conversation, &cid).unwrap();
    assert_eq!(local.status, MessageStatus::Sending);
    assert_eq!(h.relay.queued(&h.me).await, 1);

    h.go_online().await;
    assert!(h.client.is_online());
    let sent = h.sent().await;
    assert!(matches!(&sent[0], OutboundEvent::SendMessage { cid: c, .. } if c == &cid));
    assert_eq!(
        sent[1..],
        [
            OutboundEvent::JoinRoom {
                conversation_id: conversation.clone()
            },
            OutboundEvent::DeltaSyncRequest {
                conversation_id: conversation.clone(),
                since_timestamp: local.created_at,
            },
        ]
    );

    let accepted = h.accept_own(&conversation, &cid, Some(local.created_at + 5));
    let missed = h.api.messages_since(&conversation, local.created_at);
    h.deliver(InboundEvent::DeltaSyncResponse {
        conversation_id: conversation.clone(),
        since_timestamp: local.created_at,
        messages: missed,
    })
    .await;

    let list = h.messages(&conversation);
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].id, accepted.id);
    assert_eq!(list[0].cid, Some(cid));
    assert_eq!(list[0].status, MessageStatus::Sent);
    assert_eq!(h.client.messages().pending_sends(), 0);
    assert_eq!(h.client.reconnect().outstanding(), 0);
}

#[tokio::test]
async fn history_pages_join_without_gaps_or_duplicates() {
    let h = TestHarness::with_config("alice", EngineConfig::default().with_page_size(11)).await;
    let conversation = h.seed_group("c1", "team", &["bob"]);
    h.seed_history(&conversation, "bob", 1..=20);

    let first = h.client.open_conversation(&conversation).await;
    assert!(matches!(first, FetchOutcome::Applied(r) if r.inserted == 11));
    assert_eq!(timestamps(&h.messages(&conversation)), (10..=20).collect::<Vec<_>>());
    assert!(h.client.messages().has_more(&conversation));

    let second = h
        .client
        .messages()
        .fetch_page(&conversation, Some(PageCursor::Timestamp(10)))
        .await;
    assert!(matches!(second, FetchOutcome::Applied(r) if r.inserted == 9));

    let list = h.messages(&conversation);
    assert_eq!(timestamps(&list), (1..=20).collect::<Vec<_>>());
    let ids: BTreeSet<_> = list.iter().filter_map(|m| m.id.clone()).collect();
    assert_eq!(ids.len(), 20);
    assert!(!h.client.messages().has_more(&conversation));
    assert_eq!(
        h.client.messages().load_older(&conversation).await,
        FetchOutcome::Exhausted
    );
}

#[tokio::test]
async fn rapid_sends_keep_distinct_records_through_reordered_echoes() {
    let h = TestHarness::new("alice").await;
    let conversation = h.seed_direct("c1", "bob");
    h.client.open_conversation(&conversation).await;

    let first = h
        .client
        .send(&conversation, OutgoingMessage::text("one"))
        .unwrap();
    let second = h
        .client
        .send(&conversation, OutgoingMessage::text("two"))
        .unwrap();
    assert_ne!(first, second);
    assert_eq!(h.messages(&conversation).len(), 2);

    let base = now_millis() + 1_000;
    let echo_second = h.accept_own(&conversation, &second, Some(base + 1));
    let echo_first = h.accept_own(&conversation, &first, Some(base));
    h.deliver(InboundEvent::NewMessage(echo_second)).await;
    h.deliver(InboundEvent::NewMessage(echo_first)).await;

    let list = h.messages(&conversation);
    assert_eq!(list.len(), 2);
    assert!(is_ordered(&list));
    assert_eq!(list[0].cid.as_ref(), Some(&first));
    assert_eq!(list[1].cid.as_ref(), Some(&second));
    assert!(list.iter().all(|m| m.status == MessageStatus::Sent));
}

#[tokio::test]
async fn ack_then_echo_is_one_record() {
    let h = TestHarness::new("alice").await;
    let conversation = h.seed_direct("c1", "bob");
    h.client.open_conversation(&conversation).await;
    let mut events = h.client.events();

    let cid = h
        .client
        .send(&conversation, OutgoingMessage::text("hi"))
        .unwrap();
    let echo = h.accept_own(&conversation, &cid, None);
    let id = echo.id.clone().unwrap();

    h.deliver(InboundEvent::MessageAck {
        conversation_id: conversation.clone(),
        cid: cid.clone(),
        id: id.clone(),
        created_at: echo.created_at,
    })
    .await;
    h.deliver(InboundEvent::NewMessage(echo.clone())).await;
    h.deliver(InboundEvent::NewMessage(echo)).await;

    let list = h.messages(&conversation);
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].id, Some(id.clone()));
    assert_eq!(list[0].status, MessageStatus::Sent);

    let mut settled = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let EngineEvent::MessageStatusChanged { cid: c, id, status, .. } = event {
            settled.push((c, id, status));
        }
    }
    assert_eq!(settled, vec![(cid, Some(id), MessageStatus::Sent)]);
}

#[tokio::test(start_paused = true)]
async fn timed_out_send_can_be_retried() {
    let config = EngineConfig::default().with_send_timeout(Duration::from_secs(1));
    let h = TestHarness::with_config("alice", config).await;
    let conversation = h.seed_direct("c1", "bob");
    h.client.open_conversation(&conversation).await;

    let cid = h
        .client
        .send(&conversation, OutgoingMessage::text("hello"))
        .unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(h.messages(&conversation)[0].status, MessageStatus::Error);

    let fresh = h.client.retry(&conversation, &cid).unwrap();
    assert_ne!(fresh, cid);
    assert!(h.client.retry(&conversation, &fresh).is_err());

    let echo = h.accept_own(&conversation, &fresh, None);
    h.deliver(InboundEvent::NewMessage(echo)).await;

    let list = h.messages(&conversation);
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].cid, Some(fresh));
    assert_eq!(list[0].status, MessageStatus::Sent);
}

#[tokio::test]
async fn delta_for_closed_conversation_is_discarded() {
    let h = TestHarness::new("alice").await;
    let conversation = h.seed_direct("c1", "bob");
    h.seed_history(&conversation, "bob", [1]);
    h.client.directory().refresh().await;
    h.client.open_conversation(&conversation).await;
    h.client.close_conversation();
    let unread = h.client.directory().unread(&conversation);

    h.deliver(InboundEvent::DeltaSyncResponse {
        conversation_id: conversation.clone(),
        since_timestamp: 1,
        messages: vec![server_message(&conversation, "m2", None, "bob", 2)],
    })
    .await;

    assert_eq!(timestamps(&h.messages(&conversation)), vec![1]);
    let summary = h.client.directory().conversation(&conversation).unwrap();
    assert_eq!(summary.last_message_at, Some(1));
    assert_eq!(h.client.directory().unread(&conversation), unread);
}

#[tokio::test]
async fn peer_message_recovered_by_delta_counts_as_unread() {
    let h = TestHarness::new("alice").await;
    let conversation = h.seed_direct("c1", "bob");
    h.seed_history(&conversation, "bob", [1]);
    h.client.directory().refresh().await;
    h.client.mark_read(&conversation).await.unwrap();
    h.client.open_conversation(&conversation).await;
    assert_eq!(h.client.directory().unread(&conversation), 0);

    h.go_offline().await;
    let missed_at = now_millis() + 1_000;
    h.api
        .accept_message(&conversation, &UserId::from("bob"), None, "while away", Some(missed_at));
    h.go_online().await;
    assert!(h.sent().await.contains(&OutboundEvent::DeltaSyncRequest {
        conversation_id: conversation.clone(),
        since_timestamp: 1,
    }));

    let delta = InboundEvent::DeltaSyncResponse {
        conversation_id: conversation.clone(),
        since_timestamp: 1,
        messages: h.api.messages_since(&conversation, 1),
    };
    h.deliver(delta.clone()).await;

    assert_eq!(timestamps(&h.messages(&conversation)), vec![1, missed_at]);
    assert_eq!(h.client.directory().unread(&conversation), 1);
    let summary = h.client.directory().conversation(&conversation).unwrap();
    assert_eq!(summary.last_message_at, Some(missed_at));

    // A replayed delta adds nothing.
    h.deliver(delta).await;
    assert_eq!(h.client.directory().unread(&conversation), 1);
}

#[tokio::test]
async fn second_outage_requests_a_fresh_delta() {
    let h = TestHarness::new("alice").await;
    let conversation = h.seed_direct("c1", "bob");
    h.seed_history(&conversation, "bob", [1]);
    h.client.open_conversation(&conversation).await;

    let request = OutboundEvent::DeltaSyncRequest {
        conversation_id: conversation.clone(),
        since_timestamp: 1,
    };
    h.go_offline().await;
    h.go_online().await;
    assert!(h.sent().await.contains(&request));

    // The response is lost with the next outage.
    h.go_offline().await;
    h.go_online().await;
    assert!(h.sent().await.contains(&request));
    assert_eq!(h.client.reconnect().outstanding(), 1);
}

// ─────────────────────────────────────────────────────────────────────────────
// Directory
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn concurrent_direct_creation_issues_one_request() {
    let h = TestHarness::new("alice").await;
    h.api
        .set_latency(ops::CREATE_DIRECT, Duration::from_millis(20));
    let bob = UserId::from("bob");

    let (a, b) = tokio::join!(
        h.client.get_or_create_direct(&bob),
        h.client.get_or_create_direct(&bob)
    );

    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(a.id, b.id);
    assert_eq!(h.api.call_count(ops::CREATE_DIRECT), 1);
    assert_eq!(h.client.directory().pending_creations(), 0);

    let again = h.client.get_or_create_direct(&bob).await.unwrap();
    assert_eq!(again.id, a.id);
    assert_eq!(h.api.call_count(ops::CREATE_DIRECT), 1);
}

#[tokio::test]
async fn unread_resets_on_mark_read_and_counts_new_messages() {
    let h = TestHarness::new("alice").await;
    let conversation = h.seed_direct("c1", "bob");
    let mut server = h.api.conversation(&conversation).unwrap();
    server.unread_counts.insert(h.me.clone(), 3);
    h.api.seed_conversation(server);

    assert!(h.client.directory().refresh().await);
    assert_eq!(h.client.directory().unread(&conversation), 3);

    h.client.mark_read(&conversation).await.unwrap();
    assert_eq!(h.client.directory().unread(&conversation), 0);
    assert_eq!(h.client.directory().total_unread(), 0);

    let later = now_millis() + 1_000;
    let incoming = server_message(&conversation, "m9", None, "bob", later);
    h.deliver(InboundEvent::NewMessage(incoming.clone())).await;
    h.deliver(InboundEvent::NewMessage(incoming)).await;

    assert_eq!(h.client.directory().unread(&conversation), 1);
    let listed = h.client.directory().list();
    assert_eq!(listed[0].id, conversation);
    assert_eq!(listed[0].last_message_at, Some(later));
}

#[tokio::test]
async fn own_messages_never_count_as_unread() {
    let h = TestHarness::new("alice").await;
    let conversation = h.seed_direct("c1", "bob");
    h.client.directory().refresh().await;

    let own = server_message(&conversation, "m1", Some("c-1"), "alice", now_millis());
    h.deliver(InboundEvent::NewMessage(own)).await;

    assert_eq!(h.client.directory().unread(&conversation), 0);
}

// ─────────────────────────────────────────────────────────────────────────────
// Typing
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn typing_stops_automatically_once() {
    let h = TestHarness::new("alice").await;
    let conversation = h.seed_direct("c1", "bob");

    h.client.start_typing(&conversation);
    h.client.start_typing(&conversation);
    tokio::time::sleep(Duration::from_secs(10)).await;

    let sent = h.sent().await;
    let starts = sent
        .iter()
        .filter(|e| matches!(e, OutboundEvent::TypingStart { .. }))
        .count();
    let stops = sent
        .iter()
        .filter(|e| matches!(e, OutboundEvent::TypingStop { .. }))
        .count();
    assert_eq!((starts, stops), (2, 1));
    assert!(!h.client.typing().is_typing(&conversation));
}

#[tokio::test]
async fn peer_message_clears_their_typing_indicator() {
    let h = TestHarness::new("alice").await;
    let conversation = h.seed_direct("c1", "bob");
    h.client.open_conversation(&conversation).await;
    let bob = UserId::from("bob");

    h.deliver(InboundEvent::TypingStart {
        conversation_id: conversation.clone(),
        user_id: bob.clone(),
    })
    .await;
    assert_eq!(h.client.typing().typing_peers(&conversation), vec![bob]);

    let message = server_message(&conversation, "m1", None, "bob", now_millis());
    h.deliver(InboundEvent::NewMessage(message)).await;

    assert!(h.client.typing().typing_peers(&conversation).is_empty());
    assert_eq!(h.messages(&conversation).len(), 1);
}
