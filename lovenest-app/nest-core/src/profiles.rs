use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::info;

use crate::backend::{Document, DocumentPath, DocumentStore, WriteOp};
use crate::error::{NestError, Result};
use crate::model::{fields, Identity, Profile};

/// Reads and writes `users/{uid}` documents.
#[derive(Clone)]
pub struct ProfileRepository {
    store: Arc<dyn DocumentStore>,
}

impl ProfileRepository {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Create the profile of a freshly registered account, unpaired.
    pub async fn register(&self, identity: &Identity, email: &str) -> Result<Profile> {
        let now = Utc::now();
        let mut doc = Document::new();
        doc.insert(fields::EMAIL.into(), Value::String(email.to_string()));
        doc.insert(fields::CREATED_AT.into(), Value::String(now.to_rfc3339()));
        doc.insert(fields::NEST_ID.into(), Value::Null);

        self.store
            .create_document(&DocumentPath::profile(identity), doc.clone())
            .await?;
        info!("Registered profile for {}", identity);
        Profile::from_document(identity.clone(), &doc)
    }

    pub async fn get(&self, identity: &Identity) -> Result<Profile> {
        let doc = self
            .store
            .get_document(&DocumentPath::profile(identity))
            .await?
            .ok_or_else(|| NestError::NotFound(format!("profile {}", identity)))?;
        Profile::from_document(identity.clone(), &doc)
    }

    /// Merge `fields` into an existing profile.
    pub async fn update(&self, identity: &Identity, fields: Document) -> Result<()> {
        self.store
            .run_transaction(vec![WriteOp::Update {
                path: DocumentPath::profile(identity),
                fields,
            }])
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryDocumentStore;

    #[tokio::test]
    async fn test_register_creates_unpaired_profile() {
        let repo = ProfileRepository::new(Arc::new(MemoryDocumentStore::new()));
        let alice = Identity::new("alice-uid");

        let profile = repo.register(&alice, "alice@example.com").await.unwrap();
        assert!(!profile.is_paired());

        let loaded = repo.get(&alice).await.unwrap();
        assert_eq!(loaded.email.as_deref(), Some("alice@example.com"));
        assert!(loaded.created_at.is_some());
    }

    #[tokio::test]
    async fn test_register_twice_fails() {
        let repo = ProfileRepository::new(Arc::new(MemoryDocumentStore::new()));
        let alice = Identity::new("alice-uid");
        repo.register(&alice, "a@example.com").await.unwrap();
        assert!(repo.register(&alice, "a@example.com").await.is_err());
    }

    #[tokio::test]
    async fn test_missing_profile_is_not_found() {
        let repo = ProfileRepository::new(Arc::new(MemoryDocumentStore::new()));
        let err = repo.get(&Identity::new("ghost")).await.unwrap_err();
        assert!(matches!(err, NestError::NotFound(_)));
    }
}
