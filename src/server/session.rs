//! Per-document session state.
//!
//! A [`DocumentSession`] is the only mutable state shared between the
//! connections of one document. It is owned by its [`super::Room`] and only
//! ever touched while the room's mutex is held, which is what serializes
//! joins, edits, locks and unlocks into one arrival order.
//!
//! # Invariants
//!
//! - `text == compose(base_text, pending_ops[0] ∘ pending_ops[1] ∘ ...)`
//! - `locks` is anchored to `text`, not to `base_text`.

use super::lock_table::LockTable;
use crate::merge::{compose, Operation};
use crate::protocol::{format_server_event, ServerEvent};
use crate::types::{AccessDecision, ConnectionId, Snapshot, UserId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Outbound queue of one connection, carrying encoded frames.
pub type Outbox = mpsc::UnboundedSender<Arc<str>>;

/// A connection attached to a room.
#[derive(Debug, Clone)]
pub struct Member {
    /// User the connection joined as
    pub user_id: UserId,
    /// Access resolved at join time
    pub access: AccessDecision,
    /// Where frames for this connection are queued
    pub outbox: Outbox,
}

/// Mutable state of one open document.
#[derive(Debug)]
pub struct DocumentSession {
    /// Current composed text.
    pub text: String,

    /// Text as of the last flush.
    pub base_text: String,

    /// Accepted operations not yet folded into `base_text`.
    pub pending_ops: Vec<Operation>,

    /// Section locks, anchored to `text`.
    pub locks: LockTable,

    /// Attached connections.
    pub members: HashMap<ConnectionId, Member>,

    /// Armed flush timer, if any.
    pub flush_task: Option<JoinHandle<()>>,

    /// `base_text` holds changes that no write has confirmed yet.
    pub unsaved: bool,

    /// When an operation was last accepted.
    pub last_edit: SystemTime,

    /// Set once the room is evicted. A closed session accepts nothing.
    pub closed: bool,
}

impl DocumentSession {
    /// A session whose current and flushed text are both `text`.
    pub fn new(text: String) -> Self {
        DocumentSession {
            base_text: text.clone(),
            text,
            pending_ops: Vec::new(),
            locks: LockTable::new(),
            members: HashMap::new(),
            flush_task: None,
            unsaved: false,
            last_edit: SystemTime::now(),
            closed: false,
        }
    }

    /// Current text and locks, as sent to a joining connection.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            content: self.text.clone(),
            locks: self.locks.ranges().to_vec(),
        }
    }

    /// Whether `user` has any other connection in the room besides `except`.
    pub fn has_other_connection(&self, user: &UserId, except: ConnectionId) -> bool {
        self.members
            .iter()
            .any(|(id, member)| *id != except && &member.user_id == user)
    }

    /// Fold the pending queue into `base_text` and return the text to write.
    ///
    /// Returns `None` when there is nothing to write. The session stays
    /// `unsaved` until the caller confirms the write, so a failed or
    /// interrupted write is retried from `base_text`, which already contains
    /// every cleared operation.
    pub fn take_flush(&mut self) -> Option<String> {
        if self.pending_ops.is_empty() && !self.unsaved {
            return None;
        }

        let merged = self
            .pending_ops
            .drain(..)
            .fold(Operation::new(), |acc, op| acc.merge(&op));

        self.base_text = match compose(&self.base_text, &merged) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!("Pending operations do not apply to base text: {}", e);
                self.text.clone()
            }
        };
        self.unsaved = true;
        Some(self.base_text.clone())
    }

    /// Encode `event` once and queue it for every member except `except`.
    pub fn fan_out(&self, event: &ServerEvent, except: Option<ConnectionId>) {
        let Some(frame) = encode(event) else {
            return;
        };
        for (id, member) in &self.members {
            if Some(*id) == except {
                continue;
            }
            if member.outbox.send(Arc::clone(&frame)).is_err() {
                tracing::debug!("Outbox for connection {} is closed", id);
            }
        }
    }

    /// Queue `event` for a single member.
    pub fn send_to(&self, connection: ConnectionId, event: &ServerEvent) {
        if let (Some(member), Some(frame)) = (self.members.get(&connection), encode(event)) {
            if member.outbox.send(frame).is_err() {
                tracing::debug!("Outbox for connection {} is closed", connection);
            }
        }
    }
}

pub(crate) fn encode(event: &ServerEvent) -> Option<Arc<str>> {
    match format_server_event(event) {
        Ok(json) => Some(Arc::from(json)),
        Err(e) => {
            tracing::error!("Failed to serialize event: {}", e);
            None
        }
    }
}
