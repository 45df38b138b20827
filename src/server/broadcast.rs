//! Accepting edits and lock changes, and relaying them to the room.
//!
//! Each submit runs start to finish under the room's session mutex:
//! validate, mutate, then enqueue the resulting events. A rejected submit
//! leaves the session untouched and broadcasts nothing.

use super::room::Room;
use super::session::DocumentSession;
use crate::error::{Result, SyncError};
use crate::merge::{compose, Operation};
use crate::protocol::ServerEvent;
use crate::types::{ConnectionId, SectionRange, UserId};
use std::sync::Arc;
use std::time::SystemTime;

impl Room {
    /// Apply an operation from `sender` and relay it.
    ///
    /// Order of work: conflict check against foreign locks, text composition,
    /// lock transform, queueing for the flusher, then `documentUpdated` to
    /// every other member and, if any lock moved, `lockUpdate` to everyone.
    pub fn submit_operation(self: &Arc<Self>, sender: ConnectionId, op: Operation) -> Result<()> {
        let mut session = self.session.lock();
        let user = editor(&session, sender)?;

        session.locks.check_conflict(&op, &user)?;
        let text = compose(&session.text, &op)?;

        session.text = text;
        let locks_before = session.locks.clone();
        session.locks.transform(&op);
        session.pending_ops.push(op.clone());
        session.last_edit = SystemTime::now();

        tracing::debug!(
            "Accepted operation from {} on document {} ({} pending)",
            user,
            self.document_id,
            session.pending_ops.len()
        );

        session.fan_out(&ServerEvent::document_updated(op), Some(sender));
        if session.locks != locks_before {
            let event = ServerEvent::lock_update(session.locks.ranges());
            session.fan_out(&event, None);
        }

        self.schedule_flush(&mut session);
        Ok(())
    }

    /// Lock `range` for the sender and broadcast the new lock set.
    ///
    /// `claimed_user` is the user id from the request; it must match the
    /// user the connection joined as.
    pub fn submit_lock(
        &self,
        sender: ConnectionId,
        range: SectionRange,
        claimed_user: &UserId,
    ) -> Result<()> {
        let mut session = self.session.lock();
        let user = editor(&session, sender)?;
        if &user != claimed_user {
            return Err(SyncError::AccessDenied);
        }

        if let Err(e) = session.locks.try_lock(range, &user) {
            tracing::debug!(
                "Lock {:?} by {} on document {} rejected: {}",
                range,
                user,
                self.document_id,
                e
            );
            return Err(e);
        }

        let event = ServerEvent::lock_update(session.locks.ranges());
        session.fan_out(&event, None);
        Ok(())
    }

    /// Release the sender's lock on exactly `range`.
    ///
    /// Returns whether a lock was removed; only then is the new lock set
    /// broadcast.
    pub fn submit_unlock(
        &self,
        sender: ConnectionId,
        range: SectionRange,
        claimed_user: &UserId,
    ) -> Result<bool> {
        let mut session = self.session.lock();
        let user = editor(&session, sender)?;
        if &user != claimed_user {
            return Err(SyncError::AccessDenied);
        }

        if !session.locks.unlock(range, &user) {
            return Ok(false);
        }

        let event = ServerEvent::lock_update(session.locks.ranges());
        session.fan_out(&event, None);
        Ok(true)
    }

    /// Send the current lock set to one connection, so it can re-render
    /// after a rejected lock request.
    pub fn resend_locks(&self, connection: ConnectionId) {
        let session = self.session.lock();
        session.send_to(connection, &ServerEvent::lock_update(session.locks.ranges()));
    }
}

/// The user behind `connection`, provided the room is open and it is a
/// member allowed to edit.
fn editor(session: &DocumentSession, connection: ConnectionId) -> Result<UserId> {
    if session.closed {
        return Err(SyncError::RoomClosed);
    }
    match session.members.get(&connection) {
        Some(member) if member.access.can_edit() => Ok(member.user_id.clone()),
        _ => Err(SyncError::AccessDenied),
    }
}
