//! Identity, profile and nest records as stored in the document backend.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::backend::Document;
use crate::error::{NestError, Result};

/// Document field names.
pub mod fields {
    pub const EMAIL: &str = "email";
    pub const CREATED_AT: &str = "createdAt";
    pub const PAIRING_CODE: &str = "pairingCode";
    pub const NEST_ID: &str = "nestId";
    pub const PUBLIC_KEY: &str = "publicKey";
    pub const UID: &str = "uid";
    pub const USERS: &str = "users";
    pub const ANNIVERSARY_DATE: &str = "anniversaryDate";
}

/// Opaque handle of an authenticated account, issued by the auth provider.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    pub fn new(uid: impl Into<String>) -> Self {
        Self(uid.into())
    }

    pub fn uid(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NestId(String);

impl NestId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh identifier for a nest created by pairing.
    pub fn generate() -> Self {
        Self(format!("nest_{}", uuid::Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-account record holding the pairing code and nest reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub identity: Identity,
    pub email: Option<String>,
    pub pairing_code: Option<String>,
    /// Set exactly once by pairing; never cleared or reassigned.
    pub nest_id: Option<NestId>,
    /// Hex X25519 public key used for per-nest key agreement.
    pub public_key: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

impl Profile {
    pub fn from_document(identity: Identity, doc: &Document) -> Result<Self> {
        Ok(Self {
            email: optional_string(doc, fields::EMAIL)?,
            pairing_code: optional_string(doc, fields::PAIRING_CODE)?,
            nest_id: optional_string(doc, fields::NEST_ID)?.map(NestId::new),
            public_key: optional_string(doc, fields::PUBLIC_KEY)?,
            created_at: optional_timestamp(doc, fields::CREATED_AT)?,
            identity,
        })
    }

    pub fn is_paired(&self) -> bool {
        self.nest_id.is_some()
    }
}

/// The shared trust boundary of exactly two distinct accounts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Nest {
    pub id: NestId,
    members: [Identity; 2],
    pub anniversary: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Nest {
    /// Build a nest, rejecting anything but two distinct members.
    pub fn new(id: NestId, first: Identity, second: Identity, now: DateTime<Utc>) -> Result<Self> {
        if first == second {
            return Err(NestError::InvalidNest(format!(
                "nest {} needs two distinct members, got {} twice",
                id, first
            )));
        }
        Ok(Self {
            id,
            members: [first, second],
            anniversary: now,
            created_at: now,
        })
    }

    pub fn from_document(id: NestId, doc: &Document) -> Result<Self> {
        let users = doc
            .get(fields::USERS)
            .and_then(Value::as_array)
            .ok_or_else(|| NestError::InvalidNest(format!("nest {} has no member list", id)))?;

        let members: Vec<Identity> = users
            .iter()
            .map(|v| {
                v.as_str()
                    .map(Identity::new)
                    .ok_or_else(|| NestError::InvalidNest(format!("nest {} has a non-string member", id)))
            })
            .collect::<Result<_>>()?;

        let [first, second]: [Identity; 2] = members.try_into().map_err(|m: Vec<Identity>| {
            NestError::InvalidNest(format!("nest {} has {} members, expected 2", id, m.len()))
        })?;

        let created_at = optional_timestamp(doc, fields::CREATED_AT)?
            .ok_or_else(|| NestError::InvalidNest(format!("nest {} has no creation time", id)))?;
        let anniversary = optional_timestamp(doc, fields::ANNIVERSARY_DATE)?.unwrap_or(created_at);

        let mut nest = Nest::new(id, first, second, created_at)?;
        nest.anniversary = anniversary;
        Ok(nest)
    }

    pub fn to_document(&self) -> Document {
        let mut doc = Document::new();
        doc.insert(
            fields::USERS.into(),
            Value::Array(
                self.members
                    .iter()
                    .map(|m| Value::String(m.uid().to_string()))
                    .collect(),
            ),
        );
        doc.insert(
            fields::ANNIVERSARY_DATE.into(),
            Value::String(self.anniversary.to_rfc3339()),
        );
        doc.insert(
            fields::CREATED_AT.into(),
            Value::String(self.created_at.to_rfc3339()),
        );
        doc
    }

    pub fn members(&self) -> &[Identity; 2] {
        &self.members
    }

    pub fn member_set(&self) -> BTreeSet<&Identity> {
        self.members.iter().collect()
    }

    pub fn has_member(&self, identity: &Identity) -> bool {
        self.members.contains(identity)
    }

    pub fn partner_of(&self, identity: &Identity) -> Option<&Identity> {
        match &self.members {
            [a, b] if a == identity => Some(b),
            [a, b] if b == identity => Some(a),
            _ => None,
        }
    }
}

pub(crate) fn optional_string(doc: &Document, field: &str) -> Result<Option<String>> {
    match doc.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(NestError::InvalidProfile(format!(
            "field '{}' should be a string, got {}",
            field, other
        ))),
    }
}

pub(crate) fn optional_timestamp(doc: &Document, field: &str) -> Result<Option<DateTime<Utc>>> {
    match optional_string(doc, field)? {
        None => Ok(None),
        Some(raw) => DateTime::parse_from_rfc3339(&raw)
            .map(|t| Some(t.with_timezone(&Utc)))
            .map_err(|e| NestError::InvalidProfile(format!("field '{}' is not a timestamp: {}", field, e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_nest_rejects_duplicate_member() {
        let a = Identity::new("alice");
        let err = Nest::new(NestId::generate(), a.clone(), a, Utc::now()).unwrap_err();
        assert!(matches!(err, NestError::InvalidNest(_)));
    }

    #[test]
    fn test_nest_document_requires_two_members() {
        let now = Utc::now().to_rfc3339();
        let three = doc(json!({"users": ["a", "b", "c"], "createdAt": now}));
        assert!(Nest::from_document(NestId::new("n1"), &three).is_err());

        let same = doc(json!({"users": ["a", "a"], "createdAt": now}));
        assert!(Nest::from_document(NestId::new("n1"), &same).is_err());

        let ok = doc(json!({"users": ["a", "b"], "createdAt": now, "anniversaryDate": now}));
        let nest = Nest::from_document(NestId::new("n1"), &ok).unwrap();
        assert!(nest.has_member(&Identity::new("a")));
        assert_eq!(nest.partner_of(&Identity::new("b")), Some(&Identity::new("a")));
        assert_eq!(nest.partner_of(&Identity::new("z")), None);
    }

    #[test]
    fn test_nest_document_round_trip_keeps_members() {
        let nest = Nest::new(
            NestId::new("nest_1"),
            Identity::new("a"),
            Identity::new("b"),
            Utc::now(),
        )
        .unwrap();
        let parsed = Nest::from_document(nest.id.clone(), &nest.to_document()).unwrap();
        assert_eq!(parsed.member_set(), nest.member_set());
    }

    #[test]
    fn test_profile_parses_null_nest() {
        let profile = Profile::from_document(
            Identity::new("a"),
            &doc(json!({"email": "a@example.com", "nestId": null, "pairingCode": "ABC123"})),
        )
        .unwrap();
        assert!(!profile.is_paired());
        assert_eq!(profile.pairing_code.as_deref(), Some("ABC123"));
    }

    #[test]
    fn test_profile_rejects_non_string_nest() {
        let err = Profile::from_document(Identity::new("a"), &doc(json!({"nestId": 7})));
        assert!(matches!(err, Err(NestError::InvalidProfile(_))));
    }
}
