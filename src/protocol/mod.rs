//! Wire protocol of the real-time channel.
//!
//! Frames are JSON text messages carried over a WebSocket. See [`events`] for
//! the full event table.

pub mod events;

pub use events::{
    format_server_event, parse_client_event, ClientEvent, DocumentChange, DocumentUpdated,
    JoinDocument, LeaveDocument, LockUpdate, OperationAck, OperationRejected, SectionRequest,
    ServerEvent,
};
