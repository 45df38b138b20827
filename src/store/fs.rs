//! Filesystem store: one JSON record per document in a data directory.

use super::{AccessControl, DocumentStore, StoredDocument};
use crate::error::{Result, SyncError};
use crate::types::{AccessDecision, DocumentId, UserId};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::fs;

/// Stores `<dir>/<document id>.json`.
///
/// Writes go to a temporary file that is renamed over the record, so a crash
/// mid-write leaves the previous text intact. Document ids are restricted to
/// ASCII letters, digits, `-` and `_`; anything else is treated as unknown.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Open (creating if needed) the data directory and check it is writable.
    ///
    /// Failing here means the durable store is unreachable; the server treats
    /// that as fatal.
    pub async fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;

        let check = root.join(".write-check");
        fs::write(&check, b"ok").await?;
        fs::remove_file(&check).await?;

        tracing::info!("Document store opened at {}", root.display());
        Ok(FsStore { root })
    }

    /// The data directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write a whole document record, creating it if needed.
    pub async fn put(&self, id: &DocumentId, document: &StoredDocument) -> Result<()> {
        let path = self
            .path_for(id)
            .ok_or_else(|| SyncError::DocumentNotFound(id.clone()))?;
        let json = serde_json::to_vec_pretty(document)?;

        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// Read a whole document record.
    pub async fn get(&self, id: &DocumentId) -> Result<StoredDocument> {
        let path = self
            .path_for(id)
            .ok_or_else(|| SyncError::DocumentNotFound(id.clone()))?;
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(SyncError::DocumentNotFound(id.clone()));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn path_for(&self, id: &DocumentId) -> Option<PathBuf> {
        let valid = !id.as_str().is_empty()
            && id
                .as_str()
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        valid.then(|| self.root.join(format!("{}.json", id)))
    }
}

#[async_trait]
impl DocumentStore for FsStore {
    async fn load(&self, document: &DocumentId) -> Result<String> {
        Ok(self.get(document).await?.text)
    }

    async fn save(&self, document: &DocumentId, text: &str) -> Result<()> {
        let mut record = self.get(document).await?;
        record.text = text.to_string();
        record.updated_at = SystemTime::now();
        self.put(document, &record)
            .await
            .map_err(|e| SyncError::PersistenceFailure(e.to_string()))
    }
}

#[async_trait]
impl AccessControl for FsStore {
    async fn resolve_access(&self, document: &DocumentId, user: &UserId) -> Result<AccessDecision> {
        Ok(self.get(document).await?.access_for(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Permission;

    #[tokio::test]
    async fn test_round_trip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::open(dir.path()).await.unwrap();
        let id = DocumentId::from("doc-1");

        let record = StoredDocument::new("Plan", "alice")
            .with_text("draft")
            .with_collaborator("bob", Permission::View);
        store.put(&id, &record).await.unwrap();

        assert_eq!(store.load(&id).await.unwrap(), "draft");
        store.save(&id, "final").await.unwrap();

        let reopened = FsStore::open(dir.path()).await.unwrap();
        let stored = reopened.get(&id).await.unwrap();
        assert_eq!(stored.text, "final");
        assert_eq!(stored.title, "Plan");
        assert_eq!(
            reopened.resolve_access(&id, &"bob".into()).await.unwrap(),
            AccessDecision::Collaborator(Permission::View)
        );
    }

    #[tokio::test]
    async fn test_missing_document() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::open(dir.path()).await.unwrap();
        let result = store.load(&"nope".into()).await;
        assert!(matches!(result, Err(SyncError::DocumentNotFound(_))));
    }

    #[tokio::test]
    async fn test_rejects_path_like_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::open(dir.path()).await.unwrap();
        for id in ["../etc/passwd", "a/b", ""] {
            let result = store.resolve_access(&id.into(), &"alice".into()).await;
            assert!(matches!(result, Err(SyncError::DocumentNotFound(_))), "id {:?}", id);
        }
    }

    #[tokio::test]
    async fn test_open_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        let store = FsStore::open(&nested).await.unwrap();
        assert!(store.root().is_dir());
    }
}
