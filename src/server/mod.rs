//! Real-time collaboration server.
//!
//! # Components
//!
//! - [`RoomRegistry`]: one [`Room`] per open document, created on first join
//! - [`Room`]: membership, edits, locks and persistence of one document
//! - [`LockTable`]: section locks and their transform under edits
//! - [`Connection`]: per-socket dispatch of client events
//!
//! # HTTP surface
//!
//! | Route | Purpose |
//! |-------|---------|
//! | `GET /ws` | WebSocket upgrade for the real-time channel |
//! | `GET /health` | Liveness check, returns `ok` |
//! | `GET /rooms` | JSON list of [`RoomStats`] |
//!
//! # Example
//!
//! ```ignore
//! use docsync_axum::server::{router, AppState, RoomRegistry, ServerConfig};
//! use docsync_axum::store::MemoryStore;
//! use std::sync::Arc;
//!
//! let store = Arc::new(MemoryStore::new());
//! let registry = RoomRegistry::new(store.clone(), store, ServerConfig::default());
//! let app = router(AppState::new(registry));
//! ```

mod broadcast;
pub mod config;
pub mod connection;
mod flusher;
pub mod lock_table;
pub mod registry;
pub mod room;
pub mod session;
pub mod socket;

pub use config::{parse_duration, LockReleasePolicy, ServerConfig};
pub use connection::Connection;
pub use lock_table::LockTable;
pub use registry::RoomRegistry;
pub use room::{Room, RoomStats};

use axum::{extract::State, routing::get, Json, Router};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Shared state of the HTTP handlers.
#[derive(Clone, Debug)]
pub struct AppState {
    /// Every open room.
    pub registry: Arc<RoomRegistry>,
}

impl AppState {
    /// Wrap `registry` for sharing across handlers.
    pub fn new(registry: RoomRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(socket::ws_handler))
        .route("/health", get(health))
        .route("/rooms", get(rooms))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

async fn rooms(State(state): State<AppState>) -> Json<Vec<RoomStats>> {
    Json(state.registry.stats())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, StoredDocument};
    use crate::types::ConnectionId;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tokio::sync::mpsc;
    use tower::ServiceExt;

    fn state() -> AppState {
        let store = MemoryStore::new();
        store.insert("doc1", StoredDocument::new("Doc", "alice").with_text("hi"));
        let store = Arc::new(store);
        AppState::new(RoomRegistry::new(
            store.clone(),
            store,
            ServerConfig::default(),
        ))
    }

    #[tokio::test]
    async fn test_health() {
        let response = router(state())
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"ok");
    }

    #[tokio::test]
    async fn test_rooms_lists_open_documents() {
        let state = state();
        let (tx, _rx) = mpsc::unbounded_channel();
        state
            .registry
            .join(&"doc1".into(), &"alice".into(), ConnectionId::new(), tx)
            .await
            .unwrap();

        let response = router(state)
            .oneshot(Request::builder().uri("/rooms").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(
            value,
            serde_json::json!([{
                "documentId": "doc1",
                "members": 1,
                "locks": 0,
                "pendingOps": 0,
                "textLength": 2
            }])
        );
    }

    #[tokio::test]
    async fn test_ws_requires_upgrade() {
        let response = router(state())
            .oneshot(Request::builder().uri("/ws").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(response.status().is_client_error());
    }
}
