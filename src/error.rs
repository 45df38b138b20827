//! Error types for the synchronization engine.
//!
//! Every per-operation failure is local to one document session: it is either
//! reported to the submitting connection or dropped silently, and never tears
//! down the session. Only infrastructure failures at startup (an unreachable
//! document store, a bad configuration value) are fatal to the process.
//!
//! | Variant | Raised by | Surfaced as |
//! |---------|-----------|-------------|
//! | `AccessDenied` | join, edits from non-members or view-only members | `error` event |
//! | `DocumentNotFound` | join | `error` event |
//! | `InvalidOperation` | text composer | silent, or `operationRejected` |
//! | `ConflictingEdit` | lock table conflict check | silent, or `operationRejected` |
//! | `LockOverlap` | lock table `try_lock` | `error` + `lockUpdate` to sender |
//! | `RoomClosed` | any request to an evicted room | `error` event |
//! | `PersistenceFailure` | flusher | log only, retried |

use crate::types::{DocumentId, UserId};
use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors produced by the synchronization engine and its collaborators.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The user may not access the document, or the connection is not a
    /// member of its room, or the member only has view permission.
    #[error("Access denied")]
    AccessDenied,

    /// No such document exists in the durable store.
    #[error("Document not found")]
    DocumentNotFound(DocumentId),

    /// A retain or delete ran past the end of the current text, or a step
    /// failed boundary validation.
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// A lock request overlaps an existing lock.
    #[error("Section is already locked")]
    LockOverlap,

    /// A lock request with zero length.
    #[error("Invalid lock range")]
    InvalidLockRange,

    /// An edit touches a section locked by another user.
    #[error("Edit touches a section locked by {owner} at index {index}")]
    ConflictingEdit {
        /// Owner of the lock that was hit
        owner: UserId,
        /// Start index of that lock
        index: usize,
    },

    /// The room reached its member limit.
    #[error("Room is full")]
    RoomFull,

    /// The room was evicted; its members must join again.
    #[error("Document was closed")]
    RoomClosed,

    /// Writing to the durable store failed.
    #[error("Persistence failure: {0}")]
    PersistenceFailure(String),

    /// A frame from the client could not be understood.
    #[error("Malformed message: {0}")]
    Protocol(String),

    /// A configuration value could not be parsed.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Filesystem failure in the durable store.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A stored record or an outgoing frame failed to (de)serialize.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl SyncError {
    pub(crate) fn invalid_operation(message: impl Into<String>) -> Self {
        SyncError::InvalidOperation(message.into())
    }

    /// Whether the error belongs to an edit that the protocol rejects
    /// silently unless the client asked for an acknowledgement.
    pub fn is_edit_rejection(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidOperation(_) | SyncError::ConflictingEdit { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_facing_messages() {
        assert_eq!(SyncError::AccessDenied.to_string(), "Access denied");
        assert_eq!(
            SyncError::DocumentNotFound(DocumentId::from("d1")).to_string(),
            "Document not found"
        );
        assert_eq!(SyncError::RoomClosed.to_string(), "Document was closed");
    }

    #[test]
    fn test_edit_rejection_classification() {
        let conflict = SyncError::ConflictingEdit {
            owner: UserId::from("alice"),
            index: 3,
        };
        assert!(conflict.is_edit_rejection());
        assert!(SyncError::invalid_operation("past end").is_edit_rejection());
        assert!(!SyncError::LockOverlap.is_edit_rejection());
    }
}
