//! Per-nest content: chat messages and the shared records (calendar,
//! journals, love letters, scrapbook).

mod chat;
mod records;

pub use chat::{ChatFeed, ChatMessage, MessageKind, CHAT_PAGE_SIZE};
pub use records::{CalendarEvent, JournalEntry, LoveLetter, NestRecords, ScrapbookItem};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::backend::{CollectionPath, Document, DocumentStore, Subscription};
use crate::error::Result;

/// Stored entries carry their backend id and creation time.
pub(crate) trait FeedEntry: DeserializeOwned {
    fn created_at(&self) -> DateTime<Utc>;
    fn set_id(&mut self, id: String);
}

pub(crate) fn to_document<T: Serialize>(value: &T) -> Result<Document> {
    Ok(serde_json::from_value(serde_json::to_value(value)?)?)
}

/// Parse listed documents newest-first, skipping any that do not parse.
pub(crate) fn parse_newest_first<T: FeedEntry>(
    collection: &CollectionPath,
    docs: Vec<(String, Document)>,
) -> Vec<T> {
    let mut entries: Vec<T> = docs
        .into_iter()
        .filter_map(|(id, doc)| match serde_json::from_value::<T>(Value::Object(doc)) {
            Ok(mut entry) => {
                entry.set_id(id);
                Some(entry)
            }
            Err(e) => {
                warn!("Skipping malformed entry {} in {}: {}", id, collection, e);
                None
            }
        })
        .collect();
    entries.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
    entries
}

/// Follow `collection`, delivering it parsed and newest-first after every
/// change. `shape` runs on each page before delivery.
pub(crate) fn subscribe_entries<T, S, F>(
    store: &dyn DocumentStore,
    collection: CollectionPath,
    shape: S,
    on_change: F,
) -> Result<Subscription>
where
    T: FeedEntry + 'static,
    S: Fn(Vec<T>) -> Vec<T> + Send + Sync + 'static,
    F: Fn(Result<Vec<T>>) + Send + Sync + 'static,
{
    let path = collection.clone();
    store.subscribe_collection(
        &path,
        Box::new(move |snapshot| {
            on_change(snapshot.map(|docs| shape(parse_newest_first(&collection, docs))));
        }),
    )
}
