//! Core identifiers and value types shared by the server, the wire protocol
//! and the store.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Borrow the raw identifier.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                $name(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                $name(value)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(
    /// Identifier of a document, and therefore of its room.
    DocumentId
);

string_id!(
    /// Identifier of a user as known to the access-control oracle.
    UserId
);

/// Identifier of one live connection. A user may hold several.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    /// Allocate a fresh random connection id.
    pub fn new() -> Self {
        ConnectionId(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A span of the document as requested by a client, `{index, length}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SectionRange {
    /// First covered position.
    pub index: usize,
    /// Number of covered positions.
    pub length: usize,
}

impl SectionRange {
    /// `{index, length}`. A zero length is only rejected when locking.
    pub fn new(index: usize, length: usize) -> Self {
        SectionRange { index, length }
    }

    /// Exclusive end index.
    pub fn end(&self) -> usize {
        self.index + self.length
    }

    /// Two ranges overlap when they share at least one index.
    pub fn overlaps(&self, other: &SectionRange) -> bool {
        self.index < other.end() && other.index < self.end()
    }
}

/// A section of text reserved for edits by one user.
///
/// Within one document no two locks overlap, whoever owns them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockRange {
    /// First locked position in the current text.
    pub index: usize,
    /// Number of locked positions. Never 0.
    pub length: usize,
    /// The only user allowed to edit inside the lock.
    pub owner_id: UserId,
}

impl LockRange {
    /// A lock of `length` positions from `index`, held by `owner_id`.
    pub fn new(index: usize, length: usize, owner_id: impl Into<UserId>) -> Self {
        LockRange {
            index,
            length,
            owner_id: owner_id.into(),
        }
    }

    /// The span covered by the lock, without its owner.
    pub fn range(&self) -> SectionRange {
        SectionRange::new(self.index, self.length)
    }

    /// Exclusive end index.
    pub fn end(&self) -> usize {
        self.index + self.length
    }
}

/// What a joining connection receives: the current text and active locks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// The full current text.
    pub content: String,
    /// Active locks, in the order they were taken.
    pub locks: Vec<LockRange>,
}

/// Permission level granted to a collaborator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    /// Read and follow updates only.
    View,
    /// Also submit operations and take locks.
    #[default]
    Edit,
}

/// Access decision resolved once per join and cached for the membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessDecision {
    /// The document's owner. May always edit.
    Owner,
    /// Listed collaborator with the given permission.
    Collaborator(Permission),
    /// Neither owner nor collaborator.
    Denied,
}

impl AccessDecision {
    /// Whether the user may join the room at all.
    pub fn can_join(&self) -> bool {
        !matches!(self, AccessDecision::Denied)
    }

    /// Whether the user may submit operations and take locks.
    pub fn can_edit(&self) -> bool {
        matches!(
            self,
            AccessDecision::Owner | AccessDecision::Collaborator(Permission::Edit)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_section_overlap() {
        let a = SectionRange::new(0, 5);
        assert!(a.overlaps(&SectionRange::new(4, 2)));
        assert!(!a.overlaps(&SectionRange::new(5, 2)));
        assert!(SectionRange::new(2, 1).overlaps(&a));
    }

    #[test]
    fn test_lock_range_wire_shape() {
        let lock = LockRange::new(2, 3, "alice");
        let json = serde_json::to_value(&lock).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"index": 2, "length": 3, "ownerId": "alice"})
        );
    }

    #[test]
    fn test_access_levels() {
        assert!(AccessDecision::Owner.can_edit());
        assert!(AccessDecision::Collaborator(Permission::Edit).can_edit());
        assert!(!AccessDecision::Collaborator(Permission::View).can_edit());
        assert!(AccessDecision::Collaborator(Permission::View).can_join());
        assert!(!AccessDecision::Denied.can_join());
    }
}
