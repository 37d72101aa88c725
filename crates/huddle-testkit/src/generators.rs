//! Proptest generators for property-based testing.

use proptest::prelude::*;

use huddle_core::{
    Attachment, ConversationId, Message, MessageKind, OutgoingMessage, Timestamp, UserId,
};

use crate::fixtures::server_message;

/// Generate a user id from a small pool, so collisions happen.
pub fn user_id() -> impl Strategy<Value = UserId> {
    prop_oneof![Just("alice"), Just("bob"), Just("carol"), Just("dave")].prop_map(UserId::from)
}

/// Generate a creation time. The range is narrow so ties are common.
pub fn timestamp() -> impl Strategy<Value = Timestamp> {
    1i64..=1_000
}

/// Generate a MessageKind.
pub fn message_kind() -> impl Strategy<Value = MessageKind> {
    prop_oneof![
        Just(MessageKind::Text),
        Just(MessageKind::Image),
        Just(MessageKind::File),
        Just(MessageKind::System),
    ]
}

/// Generate an attachment.
pub fn attachment() -> impl Strategy<Value = Attachment> {
    (
        "[a-z]{1,12}",
        prop_oneof![Just("image/png"), Just("application/pdf")],
        0u64..10_000_000,
    )
        .prop_map(|(name, mime, size)| Attachment {
            url: format!("https://files.example/{name}"),
            name,
            mime_type: mime.to_owned(),
            size,
        })
}

/// Generate message content that passes validation.
pub fn content() -> impl Strategy<Value = String> {
    "[a-zA-Z][a-zA-Z0-9 ]{0,40}".prop_map(String::from)
}

/// Generate a valid outgoing message.
pub fn outgoing() -> impl Strategy<Value = OutgoingMessage> {
    (content(), prop::collection::vec(attachment(), 0..=3))
        .prop_map(|(content, attachments)| OutgoingMessage::text(content).with_attachments(attachments))
}

/// Generate an acknowledged server record in `conversation` with id `id`.
pub fn server_record(conversation: ConversationId, id: String) -> impl Strategy<Value = Message> {
    (user_id(), timestamp(), message_kind()).prop_map(move |(sender, at, kind)| {
        let mut message = server_message(&conversation, &id, None, sender.as_str(), at);
        message.kind = kind;
        message
    })
}

/// Generate server history of up to `max` messages with distinct ids
/// (`m0`, `m1`, ...), in arbitrary order.
pub fn history(conversation: &str, max: usize) -> impl Strategy<Value = Vec<Message>> {
    let conversation = ConversationId::from(conversation);
    (0..=max).prop_flat_map(move |len| {
        (0..len)
            .map(|i| server_record(conversation.clone(), format!("m{i}")))
            .collect::<Vec<_>>()
    })
}

/// Generate a delivery plan over `len` items: indexes with repeats, in any order.
pub fn delivery_plan(len: usize) -> impl Strategy<Value = Vec<usize>> {
    prop::collection::vec(0..len.max(1), 0..=len * 2)
}

/// Generate a permutation of `0..len`.
pub fn permutation(len: usize) -> impl Strategy<Value = Vec<usize>> {
    Just((0..len).collect::<Vec<_>>()).prop_shuffle()
}
