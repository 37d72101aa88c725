//! Strong type definitions for Huddle.
//!
//! All identifiers are string newtypes so that a conversation id can never be
//! passed where a user id is expected.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unix time in milliseconds.
pub type Timestamp = i64;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap a raw identifier.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Borrow the raw identifier.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Server-assigned conversation identifier.
    ConversationId
);

string_id!(
    /// Server-assigned message identifier. Absent until the server acknowledges a send.
    MessageId
);

string_id!(
    /// User identifier.
    UserId
);

string_id!(
    /// Client-generated correlation id ("cid") for one send attempt.
    ///
    /// Stable for the life of the attempt; a retry always mints a new one.
    ClientId
);

impl ClientId {
    /// Mint a fresh correlation id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

/// Get current time in milliseconds.
pub fn now_millis() -> Timestamp {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as Timestamp)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_ids_are_unique() {
        let a = ClientId::generate();
        let b = ClientId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 36);
    }

    #[test]
    fn test_id_debug_and_display() {
        let id = ConversationId::new("c-42");
        assert_eq!(format!("{}", id), "c-42");
        assert_eq!(format!("{:?}", id), "ConversationId(c-42)");
    }

    #[test]
    fn test_id_serializes_transparently() {
        let id = UserId::from("alice");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"alice\"");
    }
}
