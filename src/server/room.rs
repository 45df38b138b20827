//! One document's room: its session behind a mutex plus the handles needed
//! to persist it.
//!
//! Every state change of a document goes through `Room::session`, a
//! `parking_lot::Mutex` that is never held across an `.await`. Holding it
//! while enqueueing outbound frames is what makes every member observe
//! events in acceptance order. Rooms of different documents share nothing.
//!
//! The operations on a room are split by concern:
//!
//! - membership here ([`Room::attach`], [`Room::detach`])
//! - edits and locks in [`super::broadcast`]
//! - persistence in [`super::flusher`]

use super::config::{LockReleasePolicy, ServerConfig};
use super::session::{DocumentSession, Member, Outbox};
use crate::error::{Result, SyncError};
use crate::protocol::ServerEvent;
use crate::store::DocumentStore;
use crate::types::{AccessDecision, ConnectionId, DocumentId, Snapshot, UserId};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;

/// A live document shared by its connected members.
pub struct Room {
    pub(crate) document_id: DocumentId,
    pub(crate) session: Mutex<DocumentSession>,
    pub(crate) store: Arc<dyn DocumentStore>,
    pub(crate) config: Arc<ServerConfig>,
    /// Serializes writes of this document to the store.
    pub(crate) write_lock: tokio::sync::Mutex<()>,
}

/// Counters describing a room, served by the `/rooms` endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomStats {
    /// Document the room serves
    pub document_id: DocumentId,
    /// Attached connections
    pub members: usize,
    /// Section locks held
    pub locks: usize,
    /// Accepted operations waiting for the next flush
    pub pending_ops: usize,
    /// Current text length in characters
    pub text_length: usize,
}

impl Room {
    /// A room over already-loaded `text`.
    pub fn new(
        document_id: DocumentId,
        text: String,
        store: Arc<dyn DocumentStore>,
        config: Arc<ServerConfig>,
    ) -> Self {
        Room {
            document_id,
            session: Mutex::new(DocumentSession::new(text)),
            store,
            config,
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Document this room serves.
    pub fn document_id(&self) -> &DocumentId {
        &self.document_id
    }

    /// Add a connection and queue its `documentContent` snapshot.
    ///
    /// The snapshot is queued while the session is held, so no
    /// `documentUpdated` accepted later can reach the connection first.
    /// Re-attaching an attached connection refreshes its membership.
    /// A closed room refuses with [`SyncError::RoomClosed`].
    pub fn attach(
        &self,
        connection: ConnectionId,
        user_id: UserId,
        access: AccessDecision,
        outbox: Outbox,
    ) -> Result<Snapshot> {
        let mut session = self.session.lock();
        if session.closed {
            return Err(SyncError::RoomClosed);
        }
        if !session.members.contains_key(&connection)
            && session.members.len() >= self.config.max_members_per_document
        {
            return Err(SyncError::RoomFull);
        }

        tracing::info!(
            "Connection {} ({}) joined document {}",
            connection,
            user_id,
            self.document_id
        );
        session.members.insert(
            connection,
            Member {
                user_id,
                access,
                outbox,
            },
        );

        let snapshot = session.snapshot();
        session.send_to(connection, &ServerEvent::DocumentContent(snapshot.clone()));
        Ok(snapshot)
    }

    /// Remove a connection. Held locks stay unless the release policy says
    /// otherwise and this was the user's last connection.
    pub fn detach(&self, connection: ConnectionId) -> bool {
        let mut session = self.session.lock();
        let Some(member) = session.members.remove(&connection) else {
            return false;
        };
        tracing::info!(
            "Connection {} ({}) left document {}",
            connection,
            member.user_id,
            self.document_id
        );

        if self.config.lock_release == LockReleasePolicy::OnLeave
            && !session.has_other_connection(&member.user_id, connection)
        {
            let released = session.locks.release_owner(&member.user_id);
            if released > 0 {
                tracing::debug!(
                    "Released {} lock(s) of {} in document {}",
                    released,
                    member.user_id,
                    self.document_id
                );
                let event = ServerEvent::lock_update(session.locks.ranges());
                session.fan_out(&event, None);
            }
        }
        true
    }

    /// Mark the room closed and drop every member after telling it so.
    ///
    /// Pending changes stay queued for the final flush. Returns how many
    /// members were attached.
    pub(crate) fn close(&self) -> usize {
        let mut session = self.session.lock();
        session.closed = true;
        session.fan_out(&ServerEvent::error(&SyncError::RoomClosed), None);
        let members = session.members.len();
        session.members.clear();
        members
    }

    /// Whether the room was evicted.
    pub fn is_closed(&self) -> bool {
        self.session.lock().closed
    }

    /// Current text and locks.
    pub fn snapshot(&self) -> Snapshot {
        self.session.lock().snapshot()
    }

    /// Number of attached connections.
    pub fn member_count(&self) -> usize {
        self.session.lock().members.len()
    }

    /// Counters for the `/rooms` endpoint.
    pub fn stats(&self) -> RoomStats {
        let session = self.session.lock();
        RoomStats {
            document_id: self.document_id.clone(),
            members: session.members.len(),
            locks: session.locks.len(),
            pending_ops: session.pending_ops.len(),
            text_length: session.text.chars().count(),
        }
    }
}

impl std::fmt::Debug for Room {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Room")
            .field("document_id", &self.document_id)
            .finish_non_exhaustive()
    }
}
