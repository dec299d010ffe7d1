use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{parse_newest_first, subscribe_entries, to_document, FeedEntry};
use crate::backend::{CollectionPath, DocumentStore, NestCollection, Subscription};
use crate::error::{NestError, Result};
use crate::model::{Identity, NestId};
use crate::security::MessageKeys;

/// Most recent messages returned by [`ChatFeed::list`].
pub const CHAT_PAGE_SIZE: usize = 50;

const PING_TEXT: &str = "Ping!";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    /// `text` holds the URL of an uploaded image.
    Image,
    Ping,
}

/// A chat message as shown to the user. `text` is already decrypted, or the
/// decryption placeholder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    #[serde(skip)]
    pub id: String,
    pub text: String,
    pub sender_id: Identity,
    pub created_at: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default)]
    pub encrypted: bool,
}

impl FeedEntry for ChatMessage {
    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }
}

/// The `messages` collection of one nest, seen by one member.
#[derive(Clone)]
pub struct ChatFeed {
    store: Arc<dyn DocumentStore>,
    collection: CollectionPath,
    sender: Identity,
    keys: MessageKeys,
}

impl ChatFeed {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        nest: &NestId,
        sender: Identity,
        keys: MessageKeys,
    ) -> Self {
        Self {
            store,
            collection: CollectionPath::nest_feed(nest, NestCollection::Messages),
            sender,
            keys,
        }
    }

    /// Send a text message; only text is encrypted.
    pub async fn send_text(&self, text: &str) -> Result<String> {
        if text.trim().is_empty() {
            return Err(NestError::InvalidInput("message is empty".into()));
        }
        let sealed = self.keys.encrypt(text)?;
        self.send(MessageKind::Text, sealed, true).await
    }

    pub async fn send_image(&self, url: &str) -> Result<String> {
        if url.trim().is_empty() {
            return Err(NestError::InvalidInput("image URL is empty".into()));
        }
        self.send(MessageKind::Image, url.to_string(), false).await
    }

    pub async fn send_ping(&self) -> Result<String> {
        self.send(MessageKind::Ping, PING_TEXT.to_string(), false).await
    }

    async fn send(&self, kind: MessageKind, text: String, encrypted: bool) -> Result<String> {
        let message = ChatMessage {
            id: String::new(),
            text,
            sender_id: self.sender.clone(),
            created_at: Utc::now(),
            kind,
            encrypted,
        };
        let id = self
            .store
            .add_document(&self.collection, to_document(&message)?)
            .await?;
        debug!("Sent {:?} message {}", kind, id);
        Ok(id)
    }

    /// The latest [`CHAT_PAGE_SIZE`] messages, newest first. Messages that do
    /// not decrypt show the placeholder text instead of failing the list.
    pub async fn list(&self) -> Result<Vec<ChatMessage>> {
        let docs = self.store.list_documents(&self.collection).await?;
        Ok(readable_page(&self.keys, parse_newest_first(&self.collection, docs)))
    }

    /// Follow the feed live: `on_change` gets the page [`ChatFeed::list`]
    /// would return, right away and after every change. Dropping the
    /// subscription stops delivery.
    pub fn subscribe<F>(&self, on_change: F) -> Result<Subscription>
    where
        F: Fn(Result<Vec<ChatMessage>>) + Send + Sync + 'static,
    {
        let keys = self.keys.clone();
        subscribe_entries(
            &*self.store,
            self.collection.clone(),
            move |messages| readable_page(&keys, messages),
            on_change,
        )
    }
}

fn readable_page(keys: &MessageKeys, mut messages: Vec<ChatMessage>) -> Vec<ChatMessage> {
    messages.truncate(CHAT_PAGE_SIZE);
    for message in messages.iter_mut().filter(|m| m.encrypted) {
        message.text = keys.decrypt_or_placeholder(&message.text);
    }
    messages
}
