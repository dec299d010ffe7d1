//! Collaborator interfaces: the auth provider and the document store.
//!
//! The backend itself (durable storage, real-time fan-out) lives elsewhere;
//! this module only states what the core needs from it. [`memory`] holds an
//! in-process implementation used by tests and local demos.

pub mod memory;
pub mod paths;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::model::Identity;

pub use memory::{MemoryAuth, MemoryDocumentStore};
pub use paths::{CollectionPath, DocumentPath, NestCollection};

/// A document's fields.
pub type Document = serde_json::Map<String, Value>;

/// Snapshot delivered to a document listener: the document (or `None` when it
/// does not exist), or the error that interrupted the listener.
pub type DocumentSnapshot = Result<Option<Document>>;

pub type DocumentCallback = Box<dyn Fn(DocumentSnapshot) + Send + Sync>;

/// Snapshot delivered to a collection listener: every document of the
/// collection as `(id, fields)`, or the error that interrupted the listener.
pub type CollectionSnapshot = Result<Vec<(String, Document)>>;

pub type CollectionCallback = Box<dyn Fn(CollectionSnapshot) + Send + Sync>;

pub type IdentityCallback = Box<dyn Fn(Option<Identity>) + Send + Sync>;

/// Owned handle to a live listener.
///
/// Dropping the handle (or calling [`Subscription::unsubscribe`]) releases the
/// listener synchronously; after that returns no further callbacks start.
#[must_use = "dropping a Subscription immediately unsubscribes"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A handle with nothing to release.
    pub fn noop() -> Self {
        Self { cancel: None }
    }

    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// One write inside a transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Create a document; fails if it already exists.
    Create { path: DocumentPath, fields: Document },
    /// Merge fields into an existing document; fails if it is missing.
    Update { path: DocumentPath, fields: Document },
    /// Precondition: `field` is absent or null on an existing document.
    RequireFieldUnset { path: DocumentPath, field: String },
}

/// Identity changes from the authentication collaborator.
pub trait AuthProvider: Send + Sync {
    /// Register a listener. It is called with the current identity right
    /// away and then on every sign-in or sign-out.
    fn subscribe(&self, on_change: IdentityCallback) -> Subscription;
}

/// The durable document store with real-time listeners.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get_document(&self, path: &DocumentPath) -> Result<Option<Document>>;

    /// Listen to one document. The current snapshot is delivered right away.
    fn subscribe_document(
        &self,
        path: &DocumentPath,
        on_change: DocumentCallback,
    ) -> Result<Subscription>;

    /// Listen to every document of `collection`. The current contents are
    /// delivered right away and again after each change.
    fn subscribe_collection(
        &self,
        collection: &CollectionPath,
        on_change: CollectionCallback,
    ) -> Result<Subscription>;

    /// Apply all operations atomically, or none of them.
    async fn run_transaction(&self, ops: Vec<WriteOp>) -> Result<()>;

    async fn create_document(&self, path: &DocumentPath, fields: Document) -> Result<()>;

    /// Add a document with a backend-assigned id; returns the id.
    async fn add_document(&self, collection: &CollectionPath, fields: Document) -> Result<String>;

    /// Documents of `collection` whose `field` equals `value`.
    async fn find_documents(
        &self,
        collection: &CollectionPath,
        field: &str,
        value: &Value,
    ) -> Result<Vec<(String, Document)>>;

    async fn list_documents(&self, collection: &CollectionPath) -> Result<Vec<(String, Document)>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_subscription_releases_once() {
        let released = Arc::new(AtomicUsize::new(0));
        let counter = released.clone();
        let sub = Subscription::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        sub.unsubscribe();
        assert_eq!(released.load(Ordering::SeqCst), 1);

        let counter = released.clone();
        {
            let _sub = Subscription::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(released.load(Ordering::SeqCst), 2);
    }
}
