#![warn(missing_docs)]

//! # docsync: real-time collaborative text editing
//!
//! This crate implements a server that lets several users edit one plain-text
//! document at the same time. Clients send edits as sequences of
//! retain / insert / delete steps over a WebSocket; the server applies them in
//! arrival order, relays them to everyone else in the document's room, and
//! periodically writes the merged text to durable storage.
//!
//! ## Overview
//!
//! - **Operations** - Edits are [`Operation`]s: retain, insert and delete steps
//!   measured in characters. Accepted operations queue up per document and are
//!   merged in order before each write.
//! - **Rooms** - Every open document has one room holding its current text,
//!   its section locks and its members. Rooms are created on first join.
//! - **Section locks** - A user may lock `{index, length}` spans. Foreign edits
//!   inside a locked span are rejected, and locks move with the text they cover.
//! - **Persistence** - A per-document debounce timer writes the merged text to a
//!   [`store::DocumentStore`]; failed writes are retried with backoff.
//!
//! There is no operational transform: an operation is applied against the
//! server's current text exactly as received.
//!
//! ## Server Usage
//!
//! ```ignore
//! use docsync_axum::server::{router, AppState, RoomRegistry, ServerConfig};
//! use docsync_axum::store::FsStore;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ServerConfig::from_env()?;
//!     let store = Arc::new(FsStore::open(&config.data_dir).await?);
//!     let bind = config.bind_addr;
//!     let app = router(AppState::new(RoomRegistry::new(store.clone(), store, config)));
//!
//!     let listener = tokio::net::TcpListener::bind(bind).await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Composing Operations
//!
//! ```
//! use docsync_axum::merge::{compose, Operation};
//!
//! let typed = Operation::new().insert("Hello");
//! let more = Operation::new().retain(5).insert(" World");
//!
//! let text = compose("", &typed).unwrap();
//! assert_eq!(compose(&text, &more).unwrap(), "Hello World");
//! assert_eq!(compose("", &typed.merge(&more)).unwrap(), "Hello World");
//! ```
//!
//! ## Module Structure
//!
//! - **[types]** - Identifiers, ranges, snapshots and access decisions
//! - **[error]** - Error type and result alias
//! - **[merge]** - The operation model and text composition
//! - **[protocol]** - Real-time channel events and their JSON encoding
//! - **[server]** - Rooms, locks, broadcast, flushing and the axum router
//! - **[store]** - Durable document storage and access control

pub mod error;
pub mod merge;
pub mod protocol;
pub mod server;
pub mod store;
pub mod types;

pub use error::{Result, SyncError};
pub use merge::{compose, Operation};
pub use server::{router, AppState, RoomRegistry, ServerConfig};
pub use types::{DocumentId, LockRange, SectionRange, Snapshot, UserId};

#[cfg(test)]
mod tests;
