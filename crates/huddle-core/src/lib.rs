//! # Huddle Core
//!
//! Pure primitives for the Huddle synchronization engine: messages,
//! conversations, message identity and the reconciliation kernel.
//!
//! This crate contains no I/O and no async code. Everything here is plain
//! computation over owned data, so it can be tested exhaustively.
//!
//! ## Key Types
//!
//! - [`Message`] - One entry in a conversation history
//! - [`MessageKey`] - Identity of a message (`id` once acknowledged, `cid` before)
//! - [`Conversation`] - A direct or group chat
//! - [`OutgoingMessage`] - A send request prior to validation
//!
//! ## Reconciliation
//!
//! All message sources are merged with [`reconcile::merge_into`]. See the
//! [`reconcile`] module for the rules.

pub mod conversation;
pub mod error;
pub mod identity;
pub mod message;
pub mod reconcile;
pub mod types;
pub mod validation;

pub use conversation::{Conversation, ConversationKind, LastMessage};
pub use error::ValidationError;
pub use identity::{find_by_key, find_match, same_message, MessageKey};
pub use message::{Attachment, Message, MessageKind, MessageStatus};
pub use reconcile::{is_ordered, merge, merge_into, merge_into_with, MergeReport};
pub use types::{now_millis, ClientId, ConversationId, MessageId, Timestamp, UserId};
pub use validation::{
    validate_outgoing, OutgoingMessage, ValidatedMessage, MAX_ATTACHMENTS, MAX_CONTENT_CHARS,
};
