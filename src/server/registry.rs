//! Registry of live rooms, keyed by document id.
//!
//! Rooms are created lazily on the first join of a document and stay in
//! memory after their last member leaves, so a rejoin is served without
//! reloading from the store. They go away only through [`RoomRegistry::evict`]
//! or [`RoomRegistry::shutdown`].
//!
//! # Concurrency
//!
//! The map holds one `OnceCell` per document. Concurrent first joins of the
//! same document all await the same cell, so the store is read once and
//! every joiner ends up in the same room. A failed load leaves the cell
//! empty and removes it, and the next join retries.

use super::config::ServerConfig;
use super::room::{Room, RoomStats};
use super::session::Outbox;
use crate::error::{Result, SyncError};
use crate::store::{AccessControl, DocumentStore};
use crate::types::{ConnectionId, DocumentId, Snapshot, UserId};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OnceCell;

type RoomSlot = Arc<OnceCell<Arc<Room>>>;

/// Open rooms by document, plus the store and access policy used to open them.
pub struct RoomRegistry {
    /// Document id → slot that is filled once the room is loaded
    rooms: RwLock<HashMap<DocumentId, RoomSlot>>,
    store: Arc<dyn DocumentStore>,
    access: Arc<dyn AccessControl>,
    config: Arc<ServerConfig>,
}

impl RoomRegistry {
    /// An empty registry. Rooms are loaded from `store` on first join.
    pub fn new(
        store: Arc<dyn DocumentStore>,
        access: Arc<dyn AccessControl>,
        config: ServerConfig,
    ) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            store,
            access,
            config: Arc::new(config),
        }
    }

    /// Settings shared by every room.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    // ========== Membership ==========

    /// Admit a connection to a document's room.
    ///
    /// Access is resolved before the room is touched, so a denied user never
    /// causes a load. On success the connection's `documentContent` snapshot
    /// is already queued on `outbox`.
    ///
    /// # Errors
    ///
    /// - [`SyncError::DocumentNotFound`] for unknown documents
    /// - [`SyncError::AccessDenied`] when the user is neither owner nor collaborator
    /// - [`SyncError::RoomFull`] when the room is at capacity
    pub async fn join(
        &self,
        document: &DocumentId,
        user: &UserId,
        connection: ConnectionId,
        outbox: Outbox,
    ) -> Result<(Arc<Room>, Snapshot)> {
        let access = self.access.resolve_access(document, user).await?;
        if !access.can_join() {
            tracing::warn!("User {} denied access to document {}", user, document);
            return Err(SyncError::AccessDenied);
        }

        loop {
            let room = self.open(document).await?;
            match room.attach(connection, user.clone(), access, outbox.clone()) {
                Err(SyncError::RoomClosed) => {
                    // Evicted between lookup and attach. The evictor holds the
                    // write lock until its final write is done and the room is
                    // out of the map, so the next load sees that write.
                    drop(room.write_lock.lock().await);
                    continue;
                }
                Err(e) => return Err(e),
                Ok(snapshot) => return Ok((room, snapshot)),
            }
        }
    }

    /// Detach a connection from a document's room, if the room is live.
    pub fn leave(&self, document: &DocumentId, connection: ConnectionId) -> bool {
        self.get(document)
            .map(|room| room.detach(connection))
            .unwrap_or(false)
    }

    async fn open(&self, document: &DocumentId) -> Result<Arc<Room>> {
        let slot = {
            let mut rooms = self.rooms.write();
            Arc::clone(rooms.entry(document.clone()).or_default())
        };

        let loaded = slot
            .get_or_try_init(|| async {
                let text = self.store.load(document).await?;
                tracing::info!(
                    "Opened room for document {} ({} chars)",
                    document,
                    text.chars().count()
                );
                Ok::<_, SyncError>(Arc::new(Room::new(
                    document.clone(),
                    text,
                    Arc::clone(&self.store),
                    Arc::clone(&self.config),
                )))
            })
            .await;

        match loaded {
            Ok(room) => Ok(Arc::clone(room)),
            Err(e) => {
                let mut rooms = self.rooms.write();
                let stale = rooms
                    .get(document)
                    .is_some_and(|current| Arc::ptr_eq(current, &slot) && !current.initialized());
                if stale {
                    rooms.remove(document);
                }
                Err(e)
            }
        }
    }

    // ========== Lookup ==========

    /// A live room, without loading it.
    pub fn get(&self, document: &DocumentId) -> Option<Arc<Room>> {
        self.rooms
            .read()
            .get(document)
            .and_then(|slot| slot.get().cloned())
    }

    /// Ids of all live rooms in arbitrary order.
    pub fn list_rooms(&self) -> Vec<DocumentId> {
        self.rooms
            .read()
            .iter()
            .filter(|(_, slot)| slot.initialized())
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Counters of every live room, sorted by document id.
    pub fn stats(&self) -> Vec<RoomStats> {
        let rooms: Vec<Arc<Room>> = self
            .rooms
            .read()
            .values()
            .filter_map(|slot| slot.get().cloned())
            .collect();
        let mut stats: Vec<RoomStats> = rooms.iter().map(|room| room.stats()).collect();
        stats.sort_by(|a, b| a.document_id.cmp(&b.document_id));
        stats
    }

    // ========== Eviction ==========

    /// Close a room, write whatever is pending and remove it.
    ///
    /// Closing sends every member an `error` and detaches it; any later
    /// request to the room fails with [`SyncError::RoomClosed`]. The room's
    /// write lock is held from closing until it is out of the map, so a join
    /// racing the eviction waits and then loads the text written here rather
    /// than the text from before it.
    ///
    /// Returns `Ok(false)` if the document had no live room. A failed final
    /// write is returned to the caller; the room is gone either way.
    pub async fn evict(&self, document: &DocumentId) -> Result<bool> {
        let Some(room) = self.get(document) else {
            return Ok(false);
        };

        let write = room.write_lock.lock().await;
        if room.is_closed() {
            return Ok(false);
        }
        let members = room.close();
        room.cancel_flush();
        let flushed = room.write_pending().await;

        {
            let mut rooms = self.rooms.write();
            let current = rooms
                .get(document)
                .and_then(|slot| slot.get())
                .is_some_and(|live| Arc::ptr_eq(live, &room));
            if current {
                rooms.remove(document);
            }
        }
        drop(write);

        flushed?;
        tracing::info!(
            "Evicted room for document {} ({} member(s) dropped)",
            document,
            members
        );
        Ok(true)
    }

    /// Evict every room. Failed final writes are logged, not returned.
    pub async fn shutdown(&self) {
        let documents: Vec<DocumentId> = self.rooms.read().keys().cloned().collect();
        for document in documents {
            if let Err(e) = self.evict(&document).await {
                tracing::error!("Final flush of document {} failed: {}", document, e);
            }
        }
    }
}

impl std::fmt::Debug for RoomRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomRegistry")
            .field("rooms", &self.rooms.read().len())
            .finish_non_exhaustive()
    }
}
