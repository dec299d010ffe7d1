//! In-process auth provider and document store.
//!
//! Listeners fire synchronously on the writing thread, after the store lock
//! is released. Every async operation yields once before touching state so
//! concurrent callers interleave the way real network round-trips would.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::{
    AuthProvider, CollectionCallback, CollectionPath, CollectionSnapshot, Document,
    DocumentCallback, DocumentPath, DocumentSnapshot, DocumentStore, IdentityCallback,
    Subscription, WriteOp,
};
use crate::error::{NestError, Result};
use crate::model::Identity;

type SharedDocumentCallback = Arc<dyn Fn(DocumentSnapshot) + Send + Sync>;
type SharedCollectionCallback = Arc<dyn Fn(CollectionSnapshot) + Send + Sync>;
type SharedIdentityCallback = Arc<dyn Fn(Option<Identity>) + Send + Sync>;

// ============================================================================
// Auth
// ============================================================================

#[derive(Default)]
struct AuthInner {
    current: Option<Identity>,
    listeners: Vec<(u64, SharedIdentityCallback)>,
    next_listener: u64,
}

/// Auth provider whose identity is driven by test code.
#[derive(Clone, Default)]
pub struct MemoryAuth {
    inner: Arc<Mutex<AuthInner>>,
}

impl MemoryAuth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sign_in(&self, identity: Identity) {
        self.set(Some(identity));
    }

    pub fn sign_out(&self) {
        self.set(None);
    }

    pub fn current(&self) -> Option<Identity> {
        lock(&self.inner).current.clone()
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.inner).listeners.len()
    }

    fn set(&self, identity: Option<Identity>) {
        let listeners: Vec<SharedIdentityCallback> = {
            let mut inner = lock(&self.inner);
            inner.current = identity.clone();
            inner.listeners.iter().map(|(_, cb)| cb.clone()).collect()
        };
        for listener in listeners {
            listener(identity.clone());
        }
    }
}

impl AuthProvider for MemoryAuth {
    fn subscribe(&self, on_change: IdentityCallback) -> Subscription {
        let callback: SharedIdentityCallback = Arc::from(on_change);
        let (id, current) = {
            let mut inner = lock(&self.inner);
            let id = inner.next_listener;
            inner.next_listener += 1;
            inner.listeners.push((id, callback.clone()));
            (id, inner.current.clone())
        };
        callback(current);

        let weak: Weak<Mutex<AuthInner>> = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                lock(&inner).listeners.retain(|(listener, _)| *listener != id);
            }
        })
    }
}

// ============================================================================
// Documents
// ============================================================================

#[derive(Default)]
struct StoreInner {
    docs: BTreeMap<DocumentPath, Document>,
    listeners: HashMap<DocumentPath, Vec<(u64, SharedDocumentCallback)>>,
    collection_listeners: HashMap<CollectionPath, Vec<(u64, SharedCollectionCallback)>>,
    next_listener: u64,
    offline: bool,
}

impl StoreInner {
    fn check_online(&self) -> Result<()> {
        if self.offline {
            return Err(NestError::TransientNetwork("backend unreachable".into()));
        }
        Ok(())
    }

    fn listeners_for(&self, path: &DocumentPath) -> Vec<SharedDocumentCallback> {
        self.listeners
            .get(path)
            .map(|l| l.iter().map(|(_, cb)| cb.clone()).collect())
            .unwrap_or_default()
    }

    fn contents_of(&self, collection: &CollectionPath) -> Vec<(String, Document)> {
        self.docs
            .iter()
            .filter(|(path, _)| path.collection() == *collection)
            .map(|(path, doc)| (path.id().to_string(), doc.clone()))
            .collect()
    }

    /// Notifications for writes to `paths`, read after the writes landed.
    fn notifications_for<'a>(
        &self,
        paths: impl IntoIterator<Item = &'a DocumentPath>,
    ) -> Notifications {
        let mut notifications = Notifications::default();
        let mut collections = BTreeSet::new();
        for path in paths {
            notifications
                .documents
                .push((self.listeners_for(path), self.docs.get(path).cloned()));
            collections.insert(path.collection());
        }
        for collection in collections {
            if let Some(listeners) = self.collection_listeners.get(&collection) {
                let listeners = listeners.iter().map(|(_, cb)| cb.clone()).collect();
                notifications
                    .collections
                    .push((listeners, self.contents_of(&collection)));
            }
        }
        notifications
    }
}

/// Pending listener notifications, fired after the store lock is released.
#[derive(Default)]
struct Notifications {
    documents: Vec<(Vec<SharedDocumentCallback>, Option<Document>)>,
    collections: Vec<(Vec<SharedCollectionCallback>, Vec<(String, Document)>)>,
}

#[derive(Clone, Default)]
pub struct MemoryDocumentStore {
    inner: Arc<Mutex<StoreInner>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// While offline every read and write fails with `TransientNetwork`.
    pub fn set_offline(&self, offline: bool) {
        lock(&self.inner).offline = offline;
    }

    /// Deliver an error to every listener of `path`.
    pub fn inject_error(&self, path: &DocumentPath, message: &str) {
        let listeners = lock(&self.inner).listeners_for(path);
        for listener in listeners {
            listener(Err(NestError::TransientNetwork(message.to_string())));
        }
    }

    /// Write a document directly, bypassing transactions.
    pub fn put(&self, path: &DocumentPath, fields: Document) {
        let notifications = {
            let mut inner = lock(&self.inner);
            inner.docs.insert(path.clone(), fields);
            inner.notifications_for([path])
        };
        fire(notifications);
    }

    pub fn remove(&self, path: &DocumentPath) {
        let notifications = {
            let mut inner = lock(&self.inner);
            inner.docs.remove(path);
            inner.notifications_for([path])
        };
        fire(notifications);
    }

    pub fn document(&self, path: &DocumentPath) -> Option<Document> {
        lock(&self.inner).docs.get(path).cloned()
    }

    pub fn collection_len(&self, collection: &CollectionPath) -> usize {
        lock(&self.inner)
            .docs
            .keys()
            .filter(|p| p.collection() == *collection)
            .count()
    }

    pub fn listener_count(&self, path: &DocumentPath) -> usize {
        lock(&self.inner).listeners.get(path).map_or(0, Vec::len)
    }

    pub fn collection_listener_count(&self, collection: &CollectionPath) -> usize {
        lock(&self.inner)
            .collection_listeners
            .get(collection)
            .map_or(0, Vec::len)
    }

    fn apply(&self, ops: Vec<WriteOp>) -> Result<()> {
        let notifications = {
            let mut inner = lock(&self.inner);
            inner.check_online()?;

            // Stage against a copy of the touched documents so a failing op
            // leaves the store untouched.
            let mut staged: BTreeMap<DocumentPath, Option<Document>> = BTreeMap::new();
            for op in &ops {
                match op {
                    WriteOp::Create { path, fields } => {
                        if current(&inner, &staged, path).is_some() {
                            return Err(NestError::PreconditionFailed(format!(
                                "{} already exists",
                                path
                            )));
                        }
                        staged.insert(path.clone(), Some(fields.clone()));
                    }
                    WriteOp::Update { path, fields } => {
                        let mut doc = current(&inner, &staged, path)
                            .ok_or_else(|| NestError::NotFound(path.to_string()))?;
                        for (key, value) in fields {
                            doc.insert(key.clone(), value.clone());
                        }
                        staged.insert(path.clone(), Some(doc));
                    }
                    WriteOp::RequireFieldUnset { path, field } => {
                        let doc = current(&inner, &staged, path)
                            .ok_or_else(|| NestError::NotFound(path.to_string()))?;
                        if !matches!(doc.get(field), None | Some(Value::Null)) {
                            return Err(NestError::PreconditionFailed(format!(
                                "{}.{} is already set",
                                path, field
                            )));
                        }
                    }
                }
            }

            for (path, doc) in &staged {
                match doc {
                    Some(fields) => inner.docs.insert(path.clone(), fields.clone()),
                    None => inner.docs.remove(path),
                };
            }
            inner.notifications_for(staged.keys())
        };

        fire(notifications);
        Ok(())
    }
}

fn current(
    inner: &StoreInner,
    staged: &BTreeMap<DocumentPath, Option<Document>>,
    path: &DocumentPath,
) -> Option<Document> {
    match staged.get(path) {
        Some(doc) => doc.clone(),
        None => inner.docs.get(path).cloned(),
    }
}

fn fire(notifications: Notifications) {
    for (listeners, doc) in notifications.documents {
        for listener in listeners {
            listener(Ok(doc.clone()));
        }
    }
    for (listeners, contents) in notifications.collections {
        for listener in listeners {
            listener(Ok(contents.clone()));
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panicking listener must not wedge the store for everyone else.
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get_document(&self, path: &DocumentPath) -> Result<Option<Document>> {
        tokio::task::yield_now().await;
        let inner = lock(&self.inner);
        inner.check_online()?;
        Ok(inner.docs.get(path).cloned())
    }

    fn subscribe_document(
        &self,
        path: &DocumentPath,
        on_change: DocumentCallback,
    ) -> Result<Subscription> {
        let callback: SharedDocumentCallback = Arc::from(on_change);
        let (id, snapshot) = {
            let mut inner = lock(&self.inner);
            let id = inner.next_listener;
            inner.next_listener += 1;
            inner
                .listeners
                .entry(path.clone())
                .or_default()
                .push((id, callback.clone()));
            (id, inner.docs.get(path).cloned())
        };
        debug!("Listener {} attached to {}", id, path);
        callback(Ok(snapshot));

        let weak = Arc::downgrade(&self.inner);
        let path = path.clone();
        Ok(Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                let mut inner = lock(&inner);
                if let Some(listeners) = inner.listeners.get_mut(&path) {
                    listeners.retain(|(listener, _)| *listener != id);
                    if listeners.is_empty() {
                        inner.listeners.remove(&path);
                    }
                }
                debug!("Listener {} detached from {}", id, path);
            }
        }))
    }

    fn subscribe_collection(
        &self,
        collection: &CollectionPath,
        on_change: CollectionCallback,
    ) -> Result<Subscription> {
        let callback: SharedCollectionCallback = Arc::from(on_change);
        let (id, contents) = {
            let mut inner = lock(&self.inner);
            let id = inner.next_listener;
            inner.next_listener += 1;
            inner
                .collection_listeners
                .entry(collection.clone())
                .or_default()
                .push((id, callback.clone()));
            (id, inner.contents_of(collection))
        };
        debug!("Listener {} attached to collection {}", id, collection);
        callback(Ok(contents));

        let weak = Arc::downgrade(&self.inner);
        let collection = collection.clone();
        Ok(Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                let mut inner = lock(&inner);
                if let Some(listeners) = inner.collection_listeners.get_mut(&collection) {
                    listeners.retain(|(listener, _)| *listener != id);
                    if listeners.is_empty() {
                        inner.collection_listeners.remove(&collection);
                    }
                }
                debug!("Listener {} detached from collection {}", id, collection);
            }
        }))
    }

    async fn run_transaction(&self, ops: Vec<WriteOp>) -> Result<()> {
        tokio::task::yield_now().await;
        self.apply(ops)
    }

    async fn create_document(&self, path: &DocumentPath, fields: Document) -> Result<()> {
        tokio::task::yield_now().await;
        self.apply(vec![WriteOp::Create {
            path: path.clone(),
            fields,
        }])
    }

    async fn add_document(&self, collection: &CollectionPath, fields: Document) -> Result<String> {
        tokio::task::yield_now().await;
        let id = uuid::Uuid::new_v4().simple().to_string();
        self.apply(vec![WriteOp::Create {
            path: collection.doc(&id),
            fields,
        }])?;
        Ok(id)
    }

    async fn find_documents(
        &self,
        collection: &CollectionPath,
        field: &str,
        value: &Value,
    ) -> Result<Vec<(String, Document)>> {
        tokio::task::yield_now().await;
        let inner = lock(&self.inner);
        inner.check_online()?;
        Ok(inner
            .docs
            .iter()
            .filter(|(path, doc)| path.collection() == *collection && doc.get(field) == Some(value))
            .map(|(path, doc)| (path.id().to_string(), doc.clone()))
            .collect())
    }

    async fn list_documents(&self, collection: &CollectionPath) -> Result<Vec<(String, Document)>> {
        tokio::task::yield_now().await;
        let inner = lock(&self.inner);
        inner.check_online()?;
        Ok(inner.contents_of(collection))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_transaction_is_all_or_nothing() {
        let store = MemoryDocumentStore::new();
        let a = DocumentPath::profile(&Identity::new("a"));
        let b = DocumentPath::profile(&Identity::new("b"));
        store.put(&a, doc(json!({"nestId": null})));
        store.put(&b, doc(json!({"nestId": "nest_x"})));

        let result = store
            .run_transaction(vec![
                WriteOp::Update {
                    path: a.clone(),
                    fields: doc(json!({"nestId": "nest_y"})),
                },
                WriteOp::RequireFieldUnset {
                    path: b.clone(),
                    field: "nestId".into(),
                },
            ])
            .await;

        assert!(matches!(result, Err(NestError::PreconditionFailed(_))));
        assert_eq!(store.document(&a).unwrap().get("nestId"), Some(&Value::Null));
    }

    #[tokio::test]
    async fn test_listener_gets_initial_snapshot_and_updates() {
        let store = MemoryDocumentStore::new();
        let path = DocumentPath::profile(&Identity::new("a"));
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = seen.clone();
        let sub = store
            .subscribe_document(
                &path,
                Box::new(move |snapshot| {
                    sink.lock().unwrap().push(snapshot.ok().flatten().is_some());
                }),
            )
            .unwrap();
        store.put(&path, doc(json!({"email": "a@example.com"})));
        assert_eq!(*seen.lock().unwrap(), vec![false, true]);
        assert_eq!(store.listener_count(&path), 1);

        drop(sub);
        assert_eq!(store.listener_count(&path), 0);
        store.put(&path, doc(json!({})));
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_collection_listener_sees_adds_and_removes() {
        let store = MemoryDocumentStore::new();
        let feed = CollectionPath::new("nests/n1/messages");
        store.put(&feed.doc("m1"), doc(json!({"text": "first"})));
        let sizes = Arc::new(Mutex::new(Vec::new()));

        let sink = sizes.clone();
        let sub = store
            .subscribe_collection(
                &feed,
                Box::new(move |snapshot| {
                    sink.lock().unwrap().push(snapshot.map(|docs| docs.len()).unwrap_or(usize::MAX));
                }),
            )
            .unwrap();
        store.add_document(&feed, doc(json!({"text": "second"}))).await.unwrap();
        // Writes elsewhere do not wake the listener.
        store.put(&CollectionPath::new("nests/n2/messages").doc("x"), doc(json!({})));
        store.remove(&feed.doc("m1"));
        assert_eq!(*sizes.lock().unwrap(), vec![1, 2, 1]);
        assert_eq!(store.collection_listener_count(&feed), 1);

        drop(sub);
        assert_eq!(store.collection_listener_count(&feed), 0);
        store.put(&feed.doc("m3"), doc(json!({})));
        assert_eq!(sizes.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_offline_reads_fail_transiently() {
        let store = MemoryDocumentStore::new();
        store.set_offline(true);
        let err = store
            .get_document(&DocumentPath::profile(&Identity::new("a")))
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn test_auth_delivers_current_identity() {
        let auth = MemoryAuth::new();
        auth.sign_in(Identity::new("a"));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let sub = auth.subscribe(Box::new(move |id| sink.lock().unwrap().push(id)));
        auth.sign_out();
        drop(sub);
        auth.sign_in(Identity::new("b"));

        assert_eq!(*seen.lock().unwrap(), vec![Some(Identity::new("a")), None]);
        assert_eq!(auth.listener_count(), 0);
    }
}
