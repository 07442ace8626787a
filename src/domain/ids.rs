//! Type-safe identifiers for the pipeline's domain rows.
//!
//! Each identifier is a newtype wrapper around [`uuid::Uuid`] (v4) so that
//! a match identifier can never be confused with a user or event
//! identifier at a call site.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(uuid::Uuid);

        impl $name {
            /// Creates a new random identifier (UUID v4).
            #[must_use]
            pub fn new() -> Self {
                Self(uuid::Uuid::new_v4())
            }

            /// Creates an identifier from an existing [`uuid::Uuid`].
            #[must_use]
            pub const fn from_uuid(uuid: uuid::Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the inner [`uuid::Uuid`].
            #[must_use]
            pub const fn as_uuid(&self) -> &uuid::Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<uuid::Uuid> for $name {
            fn from(uuid: uuid::Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for uuid::Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

uuid_id! {
    /// Unique identifier for a match.
    ///
    /// Used to derive topic names (`match-events:{id}`) and as the row
    /// filter value for match-scoped change-feed subscriptions.
    MatchId
}

uuid_id! {
    /// Unique identifier for a single match event row.
    ///
    /// The deduplication key for the client event reducer: redelivered
    /// change records with the same `EventId` merge into one entry.
    EventId
}

uuid_id! {
    /// Unique identifier for a portal user.
    UserId
}

uuid_id! {
    /// Unique identifier for a stored notification row.
    NotificationId
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn new_generates_unique_ids() {
        let a = MatchId::new();
        let b = MatchId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn display_is_uuid_format() {
        let id = EventId::new();
        let s = format!("{id}");
        assert_eq!(s.len(), 36);
        assert!(s.contains('-'));
    }

    #[test]
    fn serde_round_trip() {
        let id = UserId::new();
        let json = serde_json::to_string(&id).ok();
        let Some(json) = json else {
            panic!("serialization failed");
        };
        let deserialized: UserId = serde_json::from_str(&json).ok().unwrap_or_else(|| {
            panic!("deserialization failed");
        });
        assert_eq!(id, deserialized);
    }

    #[test]
    fn hash_works_in_hashmap() {
        use std::collections::HashMap;
        let id = UserId::new();
        let mut map = HashMap::new();
        map.insert(id, "prefs");
        assert_eq!(map.get(&id), Some(&"prefs"));
    }

    #[test]
    fn from_uuid_round_trip() {
        let uuid = uuid::Uuid::new_v4();
        let id = NotificationId::from_uuid(uuid);
        assert_eq!(*id.as_uuid(), uuid);
    }
}
