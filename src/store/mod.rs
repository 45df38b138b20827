//! External collaborators: the durable document store and the access-control
//! oracle.
//!
//! The engine only talks to these through two traits:
//!
//! - [`DocumentStore`] loads a document's text on first join and saves merged
//!   text on flush.
//! - [`AccessControl`] decides, once per join, whether a user is the owner, a
//!   collaborator, or denied.
//!
//! Both shipped backends keep a [`StoredDocument`] record per document and
//! implement both traits from it: [`MemoryStore`] for tests and embedding,
//! [`FsStore`] for the server binary.

use crate::error::Result;
use crate::types::{AccessDecision, DocumentId, Permission, UserId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

pub mod fs;
pub mod memory;

pub use fs::FsStore;
pub use memory::MemoryStore;

/// Durable storage for document text.
#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    /// Load the current text of a document.
    ///
    /// Returns [`crate::SyncError::DocumentNotFound`] for unknown ids.
    async fn load(&self, document: &DocumentId) -> Result<String>;

    /// Replace the stored text of a document.
    async fn save(&self, document: &DocumentId, text: &str) -> Result<()>;
}

/// Resolves what a user may do with a document.
#[async_trait]
pub trait AccessControl: Send + Sync + 'static {
    /// Returns [`crate::SyncError::DocumentNotFound`] for unknown ids.
    async fn resolve_access(&self, document: &DocumentId, user: &UserId) -> Result<AccessDecision>;
}

/// A collaborator entry on a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collaborator {
    /// The collaborating user.
    pub user: UserId,
    /// Missing in a stored record means [`Permission::Edit`].
    #[serde(default)]
    pub permission: Permission,
}

/// Persistent record of one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredDocument {
    /// Display title. Not used by the sync engine.
    pub title: String,
    /// User with full access.
    pub owner: UserId,
    /// Users granted access by the owner.
    #[serde(default)]
    pub collaborators: Vec<Collaborator>,
    /// Last flushed text.
    #[serde(default)]
    pub text: String,
    /// Time of the last save.
    pub updated_at: SystemTime,
}

impl StoredDocument {
    /// An empty document owned by `owner`, without collaborators.
    pub fn new(title: impl Into<String>, owner: impl Into<UserId>) -> Self {
        StoredDocument {
            title: title.into(),
            owner: owner.into(),
            collaborators: Vec::new(),
            text: String::new(),
            updated_at: SystemTime::now(),
        }
    }

    /// Set the initial text.
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    /// Add or update a collaborator.
    pub fn with_collaborator(mut self, user: impl Into<UserId>, permission: Permission) -> Self {
        let user = user.into();
        match self.collaborators.iter_mut().find(|c| c.user == user) {
            Some(existing) => existing.permission = permission,
            None => self.collaborators.push(Collaborator { user, permission }),
        }
        self
    }

    /// The owner check runs first, then the collaborator list.
    pub fn access_for(&self, user: &UserId) -> AccessDecision {
        if &self.owner == user {
            return AccessDecision::Owner;
        }
        self.collaborators
            .iter()
            .find(|c| &c.user == user)
            .map_or(AccessDecision::Denied, |c| {
                AccessDecision::Collaborator(c.permission)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_for() {
        let doc = StoredDocument::new("Notes", "alice")
            .with_collaborator("bob", Permission::Edit)
            .with_collaborator("carol", Permission::View);

        assert_eq!(doc.access_for(&"alice".into()), AccessDecision::Owner);
        assert_eq!(
            doc.access_for(&"bob".into()),
            AccessDecision::Collaborator(Permission::Edit)
        );
        assert_eq!(
            doc.access_for(&"carol".into()),
            AccessDecision::Collaborator(Permission::View)
        );
        assert_eq!(doc.access_for(&"mallory".into()), AccessDecision::Denied);
    }

    #[test]
    fn test_collaborator_permission_is_updated_in_place() {
        let doc = StoredDocument::new("Notes", "alice")
            .with_collaborator("bob", Permission::View)
            .with_collaborator("bob", Permission::Edit);
        assert_eq!(doc.collaborators.len(), 1);
        assert_eq!(doc.collaborators[0].permission, Permission::Edit);
    }

    #[test]
    fn test_collaborator_permission_defaults_to_edit() {
        let c: Collaborator = serde_json::from_str(r#"{"user": "bob"}"#).unwrap();
        assert_eq!(c.permission, Permission::Edit);
    }
}
