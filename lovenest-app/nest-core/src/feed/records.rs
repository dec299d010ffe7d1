use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{parse_newest_first, subscribe_entries, to_document, FeedEntry};
use crate::backend::{CollectionPath, DocumentStore, NestCollection, Subscription};
use crate::error::{NestError, Result};
use crate::model::{Identity, NestId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarEvent {
    #[serde(skip)]
    pub id: String,
    pub title: String,
    /// Free-form time of day as entered, e.g. "7:30 PM".
    #[serde(default)]
    pub time: String,
    pub date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalEntry {
    #[serde(skip)]
    pub id: String,
    pub title: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// A letter that stays sealed until `unlock_date`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoveLetter {
    #[serde(skip)]
    pub id: String,
    pub title: String,
    pub content: String,
    pub unlock_date: DateTime<Utc>,
    pub sender_id: Identity,
    pub created_at: DateTime<Utc>,
}

impl LoveLetter {
    pub fn is_unlocked(&self, now: DateTime<Utc>) -> bool {
        now > self.unlock_date
    }
}

/// A photo already uploaded elsewhere; only its URL is kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapbookItem {
    #[serde(skip)]
    pub id: String,
    pub url: String,
    pub created_at: DateTime<Utc>,
}

macro_rules! feed_entry {
    ($($ty:ty),+) => {
        $(impl FeedEntry for $ty {
            fn created_at(&self) -> DateTime<Utc> {
                self.created_at
            }

            fn set_id(&mut self, id: String) {
                self.id = id;
            }
        })+
    };
}

feed_entry!(CalendarEvent, JournalEntry, LoveLetter, ScrapbookItem);

/// The shared record collections of one nest.
#[derive(Clone)]
pub struct NestRecords {
    store: Arc<dyn DocumentStore>,
    nest: NestId,
    author: Identity,
}

impl NestRecords {
    pub fn new(store: Arc<dyn DocumentStore>, nest: NestId, author: Identity) -> Self {
        Self {
            store,
            nest,
            author,
        }
    }

    fn collection(&self, kind: NestCollection) -> CollectionPath {
        CollectionPath::nest_feed(&self.nest, kind)
    }

    async fn add<T: Serialize>(&self, kind: NestCollection, entry: &T) -> Result<String> {
        let id = self
            .store
            .add_document(&self.collection(kind), to_document(entry)?)
            .await?;
        debug!("Added {} entry {} to nest {}", kind.name(), id, self.nest);
        Ok(id)
    }

    async fn list<T: FeedEntry>(&self, kind: NestCollection) -> Result<Vec<T>> {
        let collection = self.collection(kind);
        let docs = self.store.list_documents(&collection).await?;
        Ok(parse_newest_first(&collection, docs))
    }

    fn subscribe<T, F>(&self, kind: NestCollection, on_change: F) -> Result<Subscription>
    where
        T: FeedEntry + 'static,
        F: Fn(Result<Vec<T>>) + Send + Sync + 'static,
    {
        subscribe_entries(&*self.store, self.collection(kind), |entries| entries, on_change)
    }

    pub async fn add_event(&self, title: &str, time: &str, date: DateTime<Utc>) -> Result<String> {
        let event = CalendarEvent {
            id: String::new(),
            title: required("title", title)?,
            time: time.trim().to_string(),
            date,
            created_at: Utc::now(),
        };
        self.add(NestCollection::Events, &event).await
    }

    pub async fn list_events(&self) -> Result<Vec<CalendarEvent>> {
        self.list(NestCollection::Events).await
    }

    pub fn subscribe_events<F>(&self, on_change: F) -> Result<Subscription>
    where
        F: Fn(Result<Vec<CalendarEvent>>) + Send + Sync + 'static,
    {
        self.subscribe(NestCollection::Events, on_change)
    }

    pub async fn add_journal(&self, title: &str, content: &str) -> Result<String> {
        let entry = JournalEntry {
            id: String::new(),
            title: required("title", title)?,
            content: required("content", content)?,
            created_at: Utc::now(),
        };
        self.add(NestCollection::Journals, &entry).await
    }

    pub async fn list_journals(&self) -> Result<Vec<JournalEntry>> {
        self.list(NestCollection::Journals).await
    }

    pub fn subscribe_journals<F>(&self, on_change: F) -> Result<Subscription>
    where
        F: Fn(Result<Vec<JournalEntry>>) + Send + Sync + 'static,
    {
        self.subscribe(NestCollection::Journals, on_change)
    }

    pub async fn add_letter(
        &self,
        title: &str,
        content: &str,
        unlock_date: DateTime<Utc>,
    ) -> Result<String> {
        let letter = LoveLetter {
            id: String::new(),
            title: required("title", title)?,
            content: required("content", content)?,
            unlock_date,
            sender_id: self.author.clone(),
            created_at: Utc::now(),
        };
        self.add(NestCollection::LoveLetters, &letter).await
    }

    pub async fn list_letters(&self) -> Result<Vec<LoveLetter>> {
        self.list(NestCollection::LoveLetters).await
    }

    pub fn subscribe_letters<F>(&self, on_change: F) -> Result<Subscription>
    where
        F: Fn(Result<Vec<LoveLetter>>) + Send + Sync + 'static,
    {
        self.subscribe(NestCollection::LoveLetters, on_change)
    }

    pub async fn add_scrapbook_item(&self, url: &str) -> Result<String> {
        let item = ScrapbookItem {
            id: String::new(),
            url: required("url", url)?,
            created_at: Utc::now(),
        };
        self.add(NestCollection::Scrapbook, &item).await
    }

    pub async fn list_scrapbook(&self) -> Result<Vec<ScrapbookItem>> {
        self.list(NestCollection::Scrapbook).await
    }

    pub fn subscribe_scrapbook<F>(&self, on_change: F) -> Result<Subscription>
    where
        F: Fn(Result<Vec<ScrapbookItem>>) + Send + Sync + 'static,
    {
        self.subscribe(NestCollection::Scrapbook, on_change)
    }
}

fn required(field: &str, value: &str) -> Result<String> {
    if value.trim().is_empty() {
        return Err(NestError::InvalidInput(format!("{} is required", field)));
    }
    Ok(value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryDocumentStore;
    use chrono::Duration;

    fn records(store: &MemoryDocumentStore) -> NestRecords {
        NestRecords::new(
            Arc::new(store.clone()),
            NestId::new("nest_1"),
            Identity::new("alice"),
        )
    }

    #[tokio::test]
    async fn test_letters_carry_sender_and_unlock_date() {
        let store = MemoryDocumentStore::new();
        let records = records(&store);
        let opens = Utc::now() + Duration::days(30);

        records.add_letter("For our anniversary", "...", opens).await.unwrap();
        let letters = records.list_letters().await.unwrap();

        assert_eq!(letters.len(), 1);
        let letter = &letters[0];
        assert_eq!(letter.sender_id, Identity::new("alice"));
        assert!(!letter.is_unlocked(Utc::now()));
        assert!(letter.is_unlocked(opens + Duration::seconds(1)));
        assert!(!letter.is_unlocked(opens));
    }

    #[tokio::test]
    async fn test_required_fields_are_enforced() {
        let store = MemoryDocumentStore::new();
        let records = records(&store);

        assert!(matches!(
            records.add_journal("", "content").await,
            Err(NestError::InvalidInput(_))
        ));
        assert!(records.add_journal("title", "  ").await.is_err());
        assert!(records.add_letter("", "x", Utc::now()).await.is_err());
        assert!(records.add_event(" ", "8pm", Utc::now()).await.is_err());
        assert!(records.add_scrapbook_item("").await.is_err());
        assert_eq!(
            store.collection_len(&CollectionPath::nest_feed(
                &NestId::new("nest_1"),
                NestCollection::Journals
            )),
            0
        );
    }

    #[tokio::test]
    async fn test_lists_are_newest_first() {
        let store = MemoryDocumentStore::new();
        let records = records(&store);

        records.add_journal("first", "a").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        records.add_journal("second", "b").await.unwrap();

        let journals = records.list_journals().await.unwrap();
        assert_eq!(journals[0].title, "second");
        assert_eq!(journals[1].title, "first");
    }

    #[tokio::test]
    async fn test_journal_subscription_follows_writes() {
        let store = MemoryDocumentStore::new();
        let records = records(&store);
        records.add_journal("before", "a").await.unwrap();
        let titles = Arc::new(std::sync::Mutex::new(Vec::new()));

        let sink = titles.clone();
        let subscription = records
            .subscribe_journals(move |entries| {
                let latest = entries.unwrap().first().map(|e| e.title.clone());
                sink.lock().unwrap().push(latest);
            })
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        records.add_journal("after", "b").await.unwrap();
        records.add_letter("not a journal", "c", Utc::now()).await.unwrap();

        assert_eq!(
            *titles.lock().unwrap(),
            vec![Some("before".to_string()), Some("after".to_string())]
        );
        drop(subscription);
        let journals = CollectionPath::nest_feed(&NestId::new("nest_1"), NestCollection::Journals);
        assert_eq!(store.collection_listener_count(&journals), 0);
    }

    #[tokio::test]
    async fn test_events_and_scrapbook_round_trip() {
        let store = MemoryDocumentStore::new();
        let records = records(&store);
        let date = Utc::now() + Duration::days(2);

        let id = records.add_event("Dinner", "7:30 PM", date).await.unwrap();
        records
            .add_scrapbook_item("https://example.com/beach.jpg")
            .await
            .unwrap();

        let events = records.list_events().await.unwrap();
        assert_eq!(events[0].id, id);
        assert_eq!(events[0].time, "7:30 PM");
        assert_eq!(events[0].date, date);

        let photos = records.list_scrapbook().await.unwrap();
        assert_eq!(photos[0].url, "https://example.com/beach.jpg");
    }
}
