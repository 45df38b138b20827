//! Debounced persistence of accepted operations.
//!
//! The first accepted operation after a quiet period arms one timer per
//! document; operations arriving while it is armed only join the pending
//! queue. When the timer fires, the queue is merged in arrival order,
//! composed onto the last flushed text, and written to the store.
//!
//! A failed write keeps the composed text in memory (`unsaved`) and is
//! retried with exponential backoff up to `flush_max_retries` times. After
//! that the document is rewritten on the next flush triggered by an edit, an
//! eviction or shutdown. Clients are never told about write failures.

use super::room::Room;
use super::session::DocumentSession;
use crate::error::{Result, SyncError};
use std::sync::Arc;
use std::time::Duration;

impl Room {
    /// Arm the flush timer unless one is already armed or the room is
    /// closed. A closed room is written once more by its eviction.
    pub(crate) fn schedule_flush(self: &Arc<Self>, session: &mut DocumentSession) {
        if session.flush_task.is_some() || session.closed {
            return;
        }
        self.arm_flush(session, self.config.flush_delay, 0);
    }

    fn arm_flush(self: &Arc<Self>, session: &mut DocumentSession, delay: Duration, attempt: u32) {
        let room = Arc::clone(self);
        session.flush_task = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            room.scheduled_flush(attempt).await;
        }));
    }

    async fn scheduled_flush(self: Arc<Self>, attempt: u32) {
        // Free the slot first so edits accepted during the write arm a new timer.
        self.session.lock().flush_task = None;

        let Err(e) = self.flush().await else {
            return;
        };

        let mut session = self.session.lock();
        if session.flush_task.is_some() || session.closed {
            // A newer timer or the eviction will rewrite the unsaved text.
            return;
        }
        if attempt >= self.config.flush_max_retries {
            tracing::error!(
                "Giving up on document {} after {} retries: {}",
                self.document_id,
                attempt,
                e
            );
            return;
        }

        let delay = self.config.retry_delay(attempt);
        tracing::warn!(
            "Retrying flush of document {} in {:?} (attempt {})",
            self.document_id,
            delay,
            attempt + 1
        );
        self.arm_flush(&mut session, delay, attempt + 1);
    }

    /// Write pending changes to the store now.
    ///
    /// Returns `Ok(false)` when there was nothing to write. Writes of one
    /// document never overlap; a caller arriving mid-write waits for it and
    /// then writes whatever is still pending. A closed room was written by
    /// its eviction and is never written again.
    pub async fn flush(&self) -> Result<bool> {
        let _write = self.write_lock.lock().await;
        if self.session.lock().closed {
            return Ok(false);
        }
        self.write_pending().await
    }

    /// The body of [`Room::flush`], for callers already holding `write_lock`.
    pub(crate) async fn write_pending(&self) -> Result<bool> {
        let pending = { self.session.lock().take_flush() };
        let Some(text) = pending else {
            return Ok(false);
        };

        match self.store.save(&self.document_id, &text).await {
            Ok(()) => {
                self.session.lock().unsaved = false;
                tracing::debug!(
                    "Flushed document {} ({} chars)",
                    self.document_id,
                    text.chars().count()
                );
                Ok(true)
            }
            Err(e) => {
                tracing::warn!("Failed to persist document {}: {}", self.document_id, e);
                Err(match e {
                    SyncError::PersistenceFailure(_) => e,
                    other => SyncError::PersistenceFailure(other.to_string()),
                })
            }
        }
    }

    /// Disarm the flush timer, if any. Pending changes stay queued.
    pub(crate) fn cancel_flush(&self) {
        if let Some(task) = self.session.lock().flush_task.take() {
            task.abort();
        }
    }

    /// Whether the room holds changes the store has not confirmed.
    pub fn is_dirty(&self) -> bool {
        let session = self.session.lock();
        session.unsaved || !session.pending_ops.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::Operation;
    use crate::server::ServerConfig;
    use crate::store::{DocumentStore, MemoryStore, StoredDocument};
    use crate::types::{AccessDecision, ConnectionId, DocumentId};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::mpsc;

    /// Fails the first `failures` saves, then delegates.
    struct FlakyStore {
        inner: MemoryStore,
        failures: AtomicU32,
    }

    #[async_trait]
    impl DocumentStore for FlakyStore {
        async fn load(&self, document: &DocumentId) -> Result<String> {
            self.inner.load(document).await
        }

        async fn save(&self, document: &DocumentId, text: &str) -> Result<()> {
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(SyncError::PersistenceFailure("disk on fire".into()));
            }
            self.inner.save(document, text).await
        }
    }

    fn config(flush_delay: Duration) -> Arc<ServerConfig> {
        Arc::new(ServerConfig {
            flush_delay,
            retry_base: Duration::from_millis(5),
            flush_max_retries: 3,
            ..ServerConfig::default()
        })
    }

    fn room_with(store: Arc<dyn DocumentStore>, text: &str, delay: Duration) -> Arc<Room> {
        Arc::new(Room::new("d1".into(), text.into(), store, config(delay)))
    }

    fn memory(text: &str) -> MemoryStore {
        let store = MemoryStore::new();
        store.insert("d1", StoredDocument::new("Doc", "alice").with_text(text));
        store
    }

    #[tokio::test]
    async fn test_flush_writes_merged_queue() {
        let store = memory("foo");
        let room = room_with(Arc::new(store.clone()), "foo", Duration::from_secs(60));
        let (tx, _rx) = mpsc::unbounded_channel();
        let alice = ConnectionId::new();
        room.attach(alice, "alice".into(), AccessDecision::Owner, tx)
            .unwrap();

        room.submit_operation(alice, Operation::new().retain(3).insert("bar"))
            .unwrap();
        room.submit_operation(alice, Operation::new().delete(3))
            .unwrap();

        room.cancel_flush();
        assert!(room.is_dirty());
        assert!(room.flush().await.unwrap());
        assert_eq!(store.text(&"d1".into()).as_deref(), Some("bar"));
        assert!(!room.is_dirty());
        assert!(!room.flush().await.unwrap());
    }

    #[tokio::test]
    async fn test_timer_flushes_after_delay() {
        let store = memory("");
        let room = room_with(Arc::new(store.clone()), "", Duration::from_millis(20));
        let (tx, _rx) = mpsc::unbounded_channel();
        let alice = ConnectionId::new();
        room.attach(alice, "alice".into(), AccessDecision::Owner, tx)
            .unwrap();

        room.submit_operation(alice, Operation::new().insert("hi"))
            .unwrap();
        room.submit_operation(alice, Operation::new().retain(2).insert("!"))
            .unwrap();
        assert_eq!(store.text(&"d1".into()).as_deref(), Some(""));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(store.text(&"d1".into()).as_deref(), Some("hi!"));
        assert!(!room.is_dirty());
    }

    #[tokio::test]
    async fn test_failed_write_is_retried() {
        let inner = memory("foo");
        let store = Arc::new(FlakyStore {
            inner: inner.clone(),
            failures: AtomicU32::new(2),
        });
        let room = room_with(store, "foo", Duration::from_millis(5));
        let (tx, _rx) = mpsc::unbounded_channel();
        let alice = ConnectionId::new();
        room.attach(alice, "alice".into(), AccessDecision::Owner, tx)
            .unwrap();

        room.submit_operation(alice, Operation::new().retain(3).insert("d"))
            .unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(inner.text(&"d1".into()).as_deref(), Some("food"));
        assert!(!room.is_dirty());
    }

    #[tokio::test]
    async fn test_failed_flush_keeps_text_in_memory() {
        let inner = memory("foo");
        let store = Arc::new(FlakyStore {
            inner: inner.clone(),
            failures: AtomicU32::new(1),
        });
        let room = room_with(store, "foo", Duration::from_secs(60));
        let (tx, _rx) = mpsc::unbounded_channel();
        let alice = ConnectionId::new();
        room.attach(alice, "alice".into(), AccessDecision::Owner, tx)
            .unwrap();
        room.submit_operation(alice, Operation::new().delete(1))
            .unwrap();
        room.cancel_flush();

        assert!(matches!(
            room.flush().await,
            Err(SyncError::PersistenceFailure(_))
        ));
        assert!(room.is_dirty());
        assert_eq!(room.snapshot().content, "oo");

        assert!(room.flush().await.unwrap());
        assert_eq!(inner.text(&"d1".into()).as_deref(), Some("oo"));
    }

    #[tokio::test]
    async fn test_closed_room_is_not_written_again() {
        let inner = memory("foo");
        let store = Arc::new(FlakyStore {
            inner: inner.clone(),
            failures: AtomicU32::new(1),
        });
        let room = room_with(store, "foo", Duration::from_secs(60));
        let (tx, _rx) = mpsc::unbounded_channel();
        let alice = ConnectionId::new();
        room.attach(alice, "alice".into(), AccessDecision::Owner, tx)
            .unwrap();
        room.submit_operation(alice, Operation::new().delete(1))
            .unwrap();
        room.cancel_flush();

        // The final write of an eviction fails; later flushes of the closed
        // room must not reach the store a fresh room now owns.
        room.close();
        assert!(room.write_pending().await.is_err());
        inner.insert("d1", StoredDocument::new("Doc", "alice").with_text("newer"));
        assert!(!room.flush().await.unwrap());
        assert_eq!(inner.text(&"d1".into()).as_deref(), Some("newer"));
    }
}
