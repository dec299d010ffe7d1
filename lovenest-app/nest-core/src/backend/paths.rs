//! Document path conventions shared with the other app clients.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::{Identity, NestId};

pub const USERS: &str = "users";
pub const NESTS: &str = "nests";
/// One document per issued pairing code, keyed by the code.
pub const PAIRING_CODES: &str = "pairing_codes";

/// Per-nest subcollections, listed newest-first by `createdAt`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NestCollection {
    Messages,
    Events,
    Journals,
    LoveLetters,
    Scrapbook,
}

impl NestCollection {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Messages => "messages",
            Self::Events => "events",
            Self::Journals => "journals",
            Self::LoveLetters => "love_letters",
            Self::Scrapbook => "scrapbook",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CollectionPath(String);

impl CollectionPath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn profiles() -> Self {
        Self(USERS.to_string())
    }

    pub fn nests() -> Self {
        Self(NESTS.to_string())
    }

    pub fn pairing_codes() -> Self {
        Self(PAIRING_CODES.to_string())
    }

    pub fn nest_feed(nest: &NestId, collection: NestCollection) -> Self {
        Self(format!("{}/{}/{}", NESTS, nest, collection.name()))
    }

    pub fn doc(&self, id: &str) -> DocumentPath {
        DocumentPath(format!("{}/{}", self.0, id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentPath(String);

impl DocumentPath {
    pub fn profile(identity: &Identity) -> Self {
        CollectionPath::profiles().doc(identity.uid())
    }

    pub fn nest(id: &NestId) -> Self {
        CollectionPath::nests().doc(id.as_str())
    }

    /// Claim document of an issued pairing code.
    pub fn pairing_code(code: &str) -> Self {
        CollectionPath::pairing_codes().doc(code)
    }

    /// The collection this document belongs to.
    pub fn collection(&self) -> CollectionPath {
        match self.0.rsplit_once('/') {
            Some((collection, _)) => CollectionPath(collection.to_string()),
            None => CollectionPath(String::new()),
        }
    }

    /// The last path segment.
    pub fn id(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
