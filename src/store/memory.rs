//! In-memory store, shared between clones.

use super::{AccessControl, DocumentStore, StoredDocument};
use crate::error::{Result, SyncError};
use crate::types::{AccessDecision, DocumentId, UserId};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

/// Document records held in a map behind `Arc<RwLock<>>`.
///
/// Cloning yields another handle to the same records, so a test can keep
/// one clone to inspect what the flusher wrote.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    documents: Arc<RwLock<HashMap<DocumentId, StoredDocument>>>,
}

impl MemoryStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a document record.
    pub fn insert(&self, id: impl Into<DocumentId>, document: StoredDocument) {
        self.documents.write().insert(id.into(), document);
    }

    /// A copy of a document record.
    pub fn get(&self, id: &DocumentId) -> Option<StoredDocument> {
        self.documents.read().get(id).cloned()
    }

    /// Current stored text of a document.
    pub fn text(&self, id: &DocumentId) -> Option<String> {
        self.documents.read().get(id).map(|doc| doc.text.clone())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn load(&self, document: &DocumentId) -> Result<String> {
        self.text(document)
            .ok_or_else(|| SyncError::DocumentNotFound(document.clone()))
    }

    async fn save(&self, document: &DocumentId, text: &str) -> Result<()> {
        let mut documents = self.documents.write();
        let record = documents
            .get_mut(document)
            .ok_or_else(|| SyncError::DocumentNotFound(document.clone()))?;
        record.text = text.to_string();
        record.updated_at = SystemTime::now();
        Ok(())
    }
}

#[async_trait]
impl AccessControl for MemoryStore {
    async fn resolve_access(&self, document: &DocumentId, user: &UserId) -> Result<AccessDecision> {
        self.documents
            .read()
            .get(document)
            .map(|doc| doc.access_for(user))
            .ok_or_else(|| SyncError::DocumentNotFound(document.clone()))
    }
}
