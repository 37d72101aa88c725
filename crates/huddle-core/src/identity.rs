//! Message identity resolution.
//!
//! A message is identified by its server `id` once it has one, and by its
//! client `cid` before that. Every lookup in the engine goes through this
//! module instead of checking the two fields ad hoc.

use std::fmt;

use crate::message::Message;
use crate::types::{ClientId, MessageId};

/// The identity key of a message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageKey {
    /// Server-assigned id.
    Id(MessageId),
    /// Client correlation id (message not yet acknowledged).
    Cid(ClientId),
}

impl MessageKey {
    /// Resolve the key of a message: `id` if present, else `cid`.
    ///
    /// Returns `None` for a record carrying neither, which can never be
    /// reconciled and is rejected by the kernel.
    pub fn of(message: &Message) -> Option<Self> {
        match (&message.id, &message.cid) {
            (Some(id), _) => Some(MessageKey::Id(id.clone())),
            (None, Some(cid)) => Some(MessageKey::Cid(cid.clone())),
            (None, None) => None,
        }
    }

    /// Check if this key names the given message under either of its ids.
    pub fn names(&self, message: &Message) -> bool {
        match self {
            MessageKey::Id(id) => message.id.as_ref() == Some(id),
            MessageKey::Cid(cid) => message.cid.as_ref() == Some(cid),
        }
    }
}

impl fmt::Display for MessageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageKey::Id(id) => write!(f, "id:{}", id),
            MessageKey::Cid(cid) => write!(f, "cid:{}", cid),
        }
    }
}

/// Check whether two records describe the same message.
///
/// Correlation ids are compared first so a server echo of our own send finds
/// the optimistic record, then server ids.
pub fn same_message(a: &Message, b: &Message) -> bool {
    if let (Some(x), Some(y)) = (&a.cid, &b.cid) {
        if x == y {
            return true;
        }
    }
    matches!((&a.id, &b.id), (Some(x), Some(y)) if x == y)
}

/// Find the record in `list` that `incoming` reconciles with.
///
/// Matches by `cid` first, then by `id`.
pub fn find_match(list: &[Message], incoming: &Message) -> Option<usize> {
    if let Some(cid) = &incoming.cid {
        if let Some(pos) = list.iter().position(|m| m.cid.as_ref() == Some(cid)) {
            return Some(pos);
        }
    }
    let id = incoming.id.as_ref()?;
    list.iter().position(|m| m.id.as_ref() == Some(id))
}

/// Find a record by key.
pub fn find_by_key(list: &[Message], key: &MessageKey) -> Option<usize> {
    list.iter().position(|m| key.names(m))
}
