use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::code::PairingCode;
use crate::backend::{CollectionPath, Document, DocumentPath, DocumentStore, WriteOp};
use crate::error::{NestError, Result};
use crate::model::{fields, Identity, Nest, NestId, Profile};
use crate::profiles::ProfileRepository;

/// Profile found by resolving a pairing code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileRef {
    pub identity: Identity,
    pub profile: Profile,
}

/// Issues and resolves pairing codes, and pairs two accounts into a nest.
#[derive(Clone)]
pub struct PairingCodeService {
    store: Arc<dyn DocumentStore>,
    profiles: ProfileRepository,
    code_length: usize,
}

impl PairingCodeService {
    pub fn new(store: Arc<dyn DocumentStore>, code_length: usize) -> Self {
        Self {
            profiles: ProfileRepository::new(store.clone()),
            store,
            code_length,
        }
    }

    /// Publish the caller's pairing code on their profile. Issuing again
    /// returns the same code.
    ///
    /// The code is claimed by creating `pairing_codes/{code}` in the same
    /// transaction that writes the profile, so two accounts racing for one
    /// code cannot both publish it.
    pub async fn issue_code(&self, identity: &Identity) -> Result<PairingCode> {
        let code = PairingCode::derive(identity, self.code_length)?;
        let profile = self.profiles.get(identity).await?;

        if profile.pairing_code.as_deref() == Some(code.as_str()) {
            debug!("Pairing code for {} already published", identity);
            return Ok(code);
        }

        // Profiles written by clients that never claimed their code.
        let holders = self.holders_of(&code).await?;
        if holders.iter().any(|(uid, _)| uid != identity.uid()) {
            warn!("Pairing code {} collides with another account", code);
            return Err(NestError::PairingCodeTaken(code.to_string()));
        }

        let mut update = Document::new();
        update.insert(fields::PAIRING_CODE.into(), Value::String(code.to_string()));
        let mut claim = Document::new();
        claim.insert(fields::UID.into(), Value::String(identity.uid().to_string()));
        let claim_path = DocumentPath::pairing_code(code.as_str());

        let ops = vec![
            WriteOp::Create {
                path: claim_path.clone(),
                fields: claim,
            },
            WriteOp::Update {
                path: DocumentPath::profile(identity),
                fields: update.clone(),
            },
        ];
        match self.store.run_transaction(ops).await {
            Ok(()) => {}
            Err(NestError::PreconditionFailed(reason)) => {
                debug!("Pairing code claim rejected: {}", reason);
                if self.claim_owner(&claim_path).await?.as_deref() != Some(identity.uid()) {
                    warn!("Pairing code {} was claimed by another account", code);
                    return Err(NestError::PairingCodeTaken(code.to_string()));
                }
                self.profiles.update(identity, update).await?;
            }
            Err(e) => return Err(e),
        }

        info!("Issued pairing code for {}", identity);
        Ok(code)
    }

    async fn claim_owner(&self, claim: &DocumentPath) -> Result<Option<String>> {
        Ok(self
            .store
            .get_document(claim)
            .await?
            .and_then(|doc| doc.get(fields::UID).and_then(Value::as_str).map(str::to_string)))
    }

    /// Find the profile that published `code`. Input is normalized first,
    /// so lowercase or padded codes resolve too.
    pub async fn resolve_code(&self, code: &str) -> Result<ProfileRef> {
        let code = PairingCode::parse(code)?;
        let mut holders = self.holders_of(&code).await?;

        match holders.len() {
            0 => Err(NestError::NotFound(format!("pairing code {}", code))),
            1 => {
                let (uid, doc) = holders.remove(0);
                let identity = Identity::new(uid);
                let profile = Profile::from_document(identity.clone(), &doc)?;
                Ok(ProfileRef { identity, profile })
            }
            n => {
                warn!("Pairing code {} is held by {} accounts", code, n);
                Err(NestError::PairingCodeTaken(code.to_string()))
            }
        }
    }

    /// Pair the caller with the owner of `code`.
    ///
    /// The nest and both profile references are written in one transaction
    /// that only commits if neither profile already references a nest. If
    /// it loses a race, the profiles are read again: when both now point at
    /// the same nest of exactly these two accounts, that nest is returned.
    pub async fn pair(&self, identity: &Identity, code: &str) -> Result<Nest> {
        let partner = self.resolve_code(code).await?;
        if partner.identity == *identity {
            return Err(NestError::SelfPairingRejected);
        }

        let own = self.profiles.get(identity).await?;
        if let Some(nest) = self.existing_nest(&own, &partner.profile).await? {
            info!("{} and {} already share nest {}", identity, partner.identity, nest.id);
            return Ok(nest);
        }

        let nest = Nest::new(
            NestId::generate(),
            identity.clone(),
            partner.identity.clone(),
            Utc::now(),
        )?;

        match self.store.run_transaction(pairing_writes(&nest)).await {
            Ok(()) => {
                info!("Created nest {} for {} and {}", nest.id, identity, partner.identity);
                Ok(nest)
            }
            Err(NestError::PreconditionFailed(reason)) => {
                debug!("Pairing transaction rejected: {}", reason);
                let own = self.profiles.get(identity).await?;
                let theirs = self.profiles.get(&partner.identity).await?;
                self.existing_nest(&own, &theirs).await?.ok_or_else(|| {
                    NestError::ConcurrentPairingConflict(format!(
                        "{} or {} was paired concurrently",
                        identity, partner.identity
                    ))
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn holders_of(&self, code: &PairingCode) -> Result<Vec<(String, Document)>> {
        self.store
            .find_documents(
                &CollectionPath::profiles(),
                fields::PAIRING_CODE,
                &Value::String(code.to_string()),
            )
            .await
    }

    /// The nest both profiles already share, `None` if neither is paired.
    /// Any other combination means one of them belongs to someone else.
    async fn existing_nest(&self, own: &Profile, theirs: &Profile) -> Result<Option<Nest>> {
        match (&own.nest_id, &theirs.nest_id) {
            (None, None) => Ok(None),
            (Some(a), Some(b)) if a == b => {
                let doc = self
                    .store
                    .get_document(&DocumentPath::nest(a))
                    .await?
                    .ok_or_else(|| NestError::NotFound(format!("nest {}", a)))?;
                let nest = Nest::from_document(a.clone(), &doc)?;
                let expected: std::collections::BTreeSet<&Identity> =
                    [&own.identity, &theirs.identity].into_iter().collect();
                if nest.member_set() != expected {
                    return Err(NestError::ConcurrentPairingConflict(format!(
                        "nest {} does not belong to {} and {}",
                        a, own.identity, theirs.identity
                    )));
                }
                Ok(Some(nest))
            }
            _ => Err(NestError::ConcurrentPairingConflict(format!(
                "{} or {} already belongs to another nest",
                own.identity, theirs.identity
            ))),
        }
    }
}

fn pairing_writes(nest: &Nest) -> Vec<WriteOp> {
    let mut reference = Document::new();
    reference.insert(fields::NEST_ID.into(), Value::String(nest.id.to_string()));

    let mut ops: Vec<WriteOp> = nest
        .members()
        .iter()
        .map(|member| WriteOp::RequireFieldUnset {
            path: DocumentPath::profile(member),
            field: fields::NEST_ID.to_string(),
        })
        .collect();
    ops.push(WriteOp::Create {
        path: DocumentPath::nest(&nest.id),
        fields: nest.to_document(),
    });
    ops.extend(nest.members().iter().map(|member| WriteOp::Update {
        path: DocumentPath::profile(member),
        fields: reference.clone(),
    }));
    ops
}
