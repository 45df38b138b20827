//! Real-time channel events.
//!
//! Every frame is a JSON object `{"event": <name>, "data": <payload>}`.
//!
//! | Direction | Event | Payload |
//! |-----------|-------|---------|
//! | client → server | `joinDocument` | `{documentId, userId}` |
//! | client → server | `leaveDocument` | `{documentId}` |
//! | client → server | `documentChange` | `{documentId, delta, opId?}` |
//! | client → server | `lockSection` | `{documentId, range: {index, length}, userId}` |
//! | client → server | `unlockSection` | `{documentId, range: {index, length}, userId}` |
//! | server → client | `documentContent` | `{content, locks}` |
//! | server → client | `documentUpdated` | `{delta}` |
//! | server → client | `lockUpdate` | `{lockedRanges}` |
//! | server → client | `operationAck` | `{opId}` |
//! | server → client | `operationRejected` | `{opId, reason}` |
//! | server → client | `error` | message string |
//!
//! `opId` is optional and client-generated. Only operations that carry one
//! receive `operationAck` / `operationRejected`.

use crate::error::{Result, SyncError};
use crate::merge::Operation;
use crate::types::{DocumentId, LockRange, SectionRange, Snapshot, UserId};
use serde::{Deserialize, Serialize};

/// Events sent by clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientEvent {
    /// Enter a document's room and receive its content.
    JoinDocument(JoinDocument),
    /// Leave a document's room.
    LeaveDocument(LeaveDocument),
    /// Submit an edit.
    DocumentChange(DocumentChange),
    /// Request a section lock.
    LockSection(SectionRequest),
    /// Release a section lock.
    UnlockSection(SectionRequest),
}

/// Payload of `joinDocument`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinDocument {
    /// Document to open.
    pub document_id: DocumentId,
    /// User the connection acts as.
    pub user_id: UserId,
}

/// Payload of `leaveDocument`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveDocument {
    /// Document to leave.
    pub document_id: DocumentId,
}

/// Payload of `documentChange`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentChange {
    /// Document the edit applies to.
    pub document_id: DocumentId,
    /// The edit, against the server's current text.
    pub delta: Operation,
    /// Client-chosen id. When present, the sender is told the outcome.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub op_id: Option<String>,
}

/// Payload of `lockSection` and `unlockSection`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionRequest {
    /// Document holding the section.
    pub document_id: DocumentId,
    /// The section, in current text positions.
    pub range: SectionRange,
    /// Lock owner. Must be the user the connection joined as.
    pub user_id: UserId,
}

/// Events sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    /// Full text and locks, sent once on join.
    DocumentContent(Snapshot),
    /// Another member's accepted edit.
    DocumentUpdated(DocumentUpdated),
    /// The complete current lock table.
    LockUpdate(LockUpdate),
    /// The edit with this `opId` was applied.
    OperationAck(OperationAck),
    /// The edit with this `opId` was refused.
    OperationRejected(OperationRejected),
    /// A request failed. Carries the client-facing message.
    Error(String),
}

/// Payload of `documentUpdated`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentUpdated {
    /// The edit as the sender submitted it.
    pub delta: Operation,
}

/// Payload of `lockUpdate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockUpdate {
    /// Every active lock of the document.
    pub locked_ranges: Vec<LockRange>,
}

/// Payload of `operationAck`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationAck {
    /// Id from the acknowledged `documentChange`.
    pub op_id: String,
}

/// Payload of `operationRejected`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationRejected {
    /// Id from the refused `documentChange`.
    pub op_id: String,
    /// Client-facing message of the error that refused the edit.
    pub reason: String,
}

impl ServerEvent {
    /// `documentUpdated` relaying `delta`.
    pub fn document_updated(delta: Operation) -> Self {
        ServerEvent::DocumentUpdated(DocumentUpdated { delta })
    }

    /// `lockUpdate` listing `locked_ranges`.
    pub fn lock_update(locked_ranges: &[LockRange]) -> Self {
        ServerEvent::LockUpdate(LockUpdate {
            locked_ranges: locked_ranges.to_vec(),
        })
    }

    /// `operationAck` for `op_id`.
    pub fn operation_ack(op_id: String) -> Self {
        ServerEvent::OperationAck(OperationAck { op_id })
    }

    /// `operationRejected` for `op_id`, with the error's message as reason.
    pub fn operation_rejected(op_id: String, reason: &SyncError) -> Self {
        ServerEvent::OperationRejected(OperationRejected {
            op_id,
            reason: reason.to_string(),
        })
    }

    /// `error` carrying the error's client-facing message.
    pub fn error(err: &SyncError) -> Self {
        ServerEvent::Error(err.to_string())
    }
}

/// Decode one client frame.
///
/// Invalid JSON, unknown events and steps that fail validation all come back
/// as [`SyncError::Protocol`].
pub fn parse_client_event(frame: &str) -> Result<ClientEvent> {
    serde_json::from_str(frame).map_err(|e| SyncError::Protocol(e.to_string()))
}

/// Encode one server frame.
pub fn format_server_event(event: &ServerEvent) -> Result<String> {
    Ok(serde_json::to_string(event)?)
}
