//! Per-connection dispatch of client events.
//!
//! A [`Connection`] remembers which rooms it joined and turns every
//! [`ClientEvent`] into a registry or room call, then reports the outcome
//! on its own outbox:
//!
//! | Outcome | Sent to the client |
//! |---------|--------------------|
//! | join / access failure | `error` |
//! | accepted edit with `opId` | `operationAck` |
//! | rejected edit with `opId` | `operationRejected` |
//! | rejected edit without `opId` | nothing |
//! | rejected lock | `error`, then the current `lockUpdate` |
//! | request to an evicted room | `error` (the room is then forgotten) |
//! | malformed frame | `error` |

use super::registry::RoomRegistry;
use super::room::Room;
use super::session::{encode, Outbox};
use crate::error::{Result, SyncError};
use crate::protocol::{ClientEvent, DocumentChange, ServerEvent, SectionRequest};
use crate::types::{ConnectionId, DocumentId, UserId};
use std::collections::HashMap;
use std::sync::Arc;

/// One client's view of the rooms it joined.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    outbox: Outbox,
    /// Rooms this connection is a member of, with the user it joined as.
    joined: HashMap<DocumentId, (Arc<Room>, UserId)>,
}

impl Connection {
    /// A connection with a fresh id whose frames go to `outbox`.
    pub fn new(outbox: Outbox) -> Self {
        Connection {
            id: ConnectionId::new(),
            outbox,
            joined: HashMap::new(),
        }
    }

    /// Id under which this connection is a room member.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Documents this connection has joined.
    pub fn joined(&self) -> impl Iterator<Item = &DocumentId> {
        self.joined.keys()
    }

    /// Handle one decoded client event.
    pub async fn handle(&mut self, registry: &RoomRegistry, event: ClientEvent) {
        match event {
            ClientEvent::JoinDocument(join) => {
                self.join(registry, join.document_id, join.user_id).await;
            }
            ClientEvent::LeaveDocument(leave) => {
                if let Some((room, _)) = self.joined.remove(&leave.document_id) {
                    room.detach(self.id);
                }
            }
            ClientEvent::DocumentChange(change) => self.change(change),
            ClientEvent::LockSection(request) => self.lock(request),
            ClientEvent::UnlockSection(request) => self.unlock(request),
        }
        // Forget evicted rooms; the request above reported the closure.
        self.joined.retain(|_, (room, _)| !room.is_closed());
    }

    /// Report a frame that could not be decoded.
    pub fn reject_frame(&self, err: &SyncError) {
        tracing::warn!("Malformed frame on connection {}: {}", self.id, err);
        self.reply(&ServerEvent::error(err));
    }

    /// Leave every joined room. Called once the socket is gone.
    pub fn close(&mut self) {
        for (document, (room, user)) in self.joined.drain() {
            tracing::debug!("Connection {} ({}) closing, leaving {}", self.id, user, document);
            room.detach(self.id);
        }
    }

    async fn join(&mut self, registry: &RoomRegistry, document: DocumentId, user: UserId) {
        match registry
            .join(&document, &user, self.id, self.outbox.clone())
            .await
        {
            Ok((room, _)) => {
                // A rejoin after eviction lands in a fresh room.
                if let Some((previous, _)) = self.joined.get(&document) {
                    if !Arc::ptr_eq(previous, &room) {
                        previous.detach(self.id);
                    }
                }
                self.joined.insert(document, (room, user));
            }
            Err(e) => {
                tracing::warn!("Join of {} by {} failed: {}", document, user, e);
                self.reply(&ServerEvent::error(&e));
            }
        }
    }

    fn change(&self, change: DocumentChange) {
        let result = self
            .room(&change.document_id)
            .and_then(|room| room.submit_operation(self.id, change.delta));

        match (result, change.op_id) {
            (Ok(()), Some(op_id)) => self.reply(&ServerEvent::operation_ack(op_id)),
            (Ok(()), None) => {}
            (Err(e), Some(op_id)) => {
                tracing::debug!("Operation {} on {} rejected: {}", op_id, change.document_id, e);
                self.reply(&ServerEvent::operation_rejected(op_id, &e));
            }
            (Err(e), None) if e.is_edit_rejection() => {
                tracing::debug!("Operation on {} rejected: {}", change.document_id, e);
            }
            (Err(e), None) => self.reply(&ServerEvent::error(&e)),
        }
    }

    fn lock(&self, request: SectionRequest) {
        let room = match self.room(&request.document_id) {
            Ok(room) => room,
            Err(e) => {
                self.reply(&ServerEvent::error(&e));
                return;
            }
        };
        if let Err(e) = room.submit_lock(self.id, request.range, &request.user_id) {
            self.reply(&ServerEvent::error(&e));
            room.resend_locks(self.id);
        }
    }

    fn unlock(&self, request: SectionRequest) {
        let result = self
            .room(&request.document_id)
            .and_then(|room| room.submit_unlock(self.id, request.range, &request.user_id));
        match result {
            Ok(true) => {}
            Ok(false) => tracing::debug!(
                "Unlock of {:?} on {} matched no lock of {}",
                request.range,
                request.document_id,
                request.user_id
            ),
            Err(e) => self.reply(&ServerEvent::error(&e)),
        }
    }

    /// The room of a joined document. Events for documents this connection
    /// never joined are refused, as are events for evicted rooms.
    fn room(&self, document: &DocumentId) -> Result<&Arc<Room>> {
        match self.joined.get(document) {
            Some((room, _)) if room.is_closed() => Err(SyncError::RoomClosed),
            Some((room, _)) => Ok(room),
            None => Err(SyncError::AccessDenied),
        }
    }

    fn reply(&self, event: &ServerEvent) {
        if let Some(frame) = encode(event) {
            if self.outbox.send(frame).is_err() {
                tracing::debug!("Outbox for connection {} is closed", self.id);
            }
        }
    }
}
