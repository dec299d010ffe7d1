//! App-lock PIN: format checks, Argon2id verifier and constant-time compare.

use std::sync::Arc;

use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use subtle::ConstantTimeEq;
use tracing::{debug, info, warn};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use super::store::{CredentialStore, PIN_CREDENTIAL};
use crate::error::{NestError, Result};

/// Argon2id parameters for PIN verifiers.
/// A 4-digit PIN has little entropy no matter what; these keep an offline
/// guess from being free while staying quick enough for an unlock screen.
const ARGON2_MEMORY_COST: u32 = 19456; // 19 MiB in KiB
const ARGON2_TIME_COST: u32 = 2;
const ARGON2_PARALLELISM: u32 = 1;
const ARGON2_OUTPUT_LEN: usize = 32;

/// Salt size in bytes (128 bits)
const SALT_SIZE: usize = 16;

const VERIFIER_TAG: &str = "argon2id";

/// Longest raw PIN older releases could have written.
const LEGACY_PIN_MAX_LEN: usize = 8;

/// Salted Argon2id digest of a PIN.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct PinVerifier {
    salt: [u8; SALT_SIZE],
    digest: [u8; ARGON2_OUTPUT_LEN],
}

impl PinVerifier {
    /// Create a verifier with a fresh random salt.
    pub fn create(pin: &str) -> Result<Self> {
        let mut salt = [0u8; SALT_SIZE];
        rand::rng().fill_bytes(&mut salt);
        let digest = Self::derive(pin, &salt)?;
        Ok(Self { salt, digest })
    }

    pub fn verify(&self, pin: &str) -> Result<bool> {
        let mut candidate = Self::derive(pin, &self.salt)?;
        let matches = bool::from(candidate[..].ct_eq(&self.digest[..]));
        candidate.zeroize();
        Ok(matches)
    }

    /// `argon2id$<salt hex>$<digest hex>`
    pub fn encode(&self) -> String {
        format!(
            "{}${}${}",
            VERIFIER_TAG,
            hex::encode(self.salt),
            hex::encode(self.digest)
        )
    }

    pub fn decode(encoded: &str) -> Result<Self> {
        let corrupted = || NestError::StorageUnavailable("stored PIN verifier is corrupted".into());

        let mut parts = encoded.split('$');
        if parts.next() != Some(VERIFIER_TAG) {
            return Err(corrupted());
        }
        let salt = parts.next().ok_or_else(corrupted)?;
        let digest = parts.next().ok_or_else(corrupted)?;
        if parts.next().is_some() {
            return Err(corrupted());
        }

        let mut verifier = Self {
            salt: [0u8; SALT_SIZE],
            digest: [0u8; ARGON2_OUTPUT_LEN],
        };
        hex::decode_to_slice(salt, &mut verifier.salt).map_err(|_| corrupted())?;
        hex::decode_to_slice(digest, &mut verifier.digest).map_err(|_| corrupted())?;
        Ok(verifier)
    }

    fn derive(pin: &str, salt: &[u8; SALT_SIZE]) -> Result<[u8; ARGON2_OUTPUT_LEN]> {
        let params = Params::new(
            ARGON2_MEMORY_COST,
            ARGON2_TIME_COST,
            ARGON2_PARALLELISM,
            Some(ARGON2_OUTPUT_LEN),
        )
        .map_err(|e| NestError::Encryption(format!("Invalid Argon2 params: {}", e)))?;

        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let mut digest = [0u8; ARGON2_OUTPUT_LEN];
        argon2
            .hash_password_into(pin.as_bytes(), salt, &mut digest)
            .map_err(|e| NestError::Encryption(format!("Key derivation failed: {}", e)))?;
        Ok(digest)
    }
}

impl std::fmt::Debug for PinVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinVerifier")
            .field("digest", &"[REDACTED]")
            .finish()
    }
}

/// Check the PIN is exactly `length` ASCII digits.
pub fn validate_pin(pin: &str, length: usize) -> Result<()> {
    if pin.len() != length || !pin.bytes().all(|b| b.is_ascii_digit()) {
        return Err(NestError::InvalidPin);
    }
    Ok(())
}

/// What the `app_pin` entry holds.
enum StoredPin {
    Verifier(PinVerifier),
    /// Raw digits written by older releases; replaced by a verifier on the
    /// first successful unlock.
    Legacy(Zeroizing<String>),
}

impl StoredPin {
    fn parse(stored: &[u8]) -> Option<Self> {
        let text = std::str::from_utf8(stored).ok()?;
        if let Ok(verifier) = PinVerifier::decode(text) {
            return Some(StoredPin::Verifier(verifier));
        }
        let is_raw_pin = !text.is_empty()
            && text.len() <= LEGACY_PIN_MAX_LEN
            && text.bytes().all(|b| b.is_ascii_digit());
        is_raw_pin.then(|| StoredPin::Legacy(Zeroizing::new(text.to_string())))
    }
}

/// The app-lock PIN as kept in the credential store.
#[derive(Clone)]
pub struct PinStore {
    credentials: Arc<CredentialStore>,
    pin_length: usize,
}

impl PinStore {
    pub fn new(credentials: Arc<CredentialStore>, pin_length: usize) -> Self {
        Self {
            credentials,
            pin_length,
        }
    }

    pub fn credentials(&self) -> &Arc<CredentialStore> {
        &self.credentials
    }

    /// Whether app-lock is enabled (a usable PIN is stored).
    ///
    /// An entry that is neither a verifier nor a raw PIN counts as no PIN, so
    /// the user can set a new one instead of being locked out.
    pub fn has_pin(&self) -> Result<bool> {
        Ok(self.load()?.is_some())
    }

    pub fn set_pin(&self, pin: &str) -> Result<()> {
        validate_pin(pin, self.pin_length)?;
        self.store_verifier(pin)?;
        info!("App lock PIN stored");
        Ok(())
    }

    /// `Ok(false)` for a wrong PIN, `NotFound` when no PIN is set.
    pub fn verify_pin(&self, pin: &str) -> Result<bool> {
        let stored = self
            .load()?
            .ok_or_else(|| NestError::NotFound("app lock PIN".into()))?;

        match stored {
            StoredPin::Verifier(verifier) => {
                if validate_pin(pin, self.pin_length).is_err() {
                    debug!("Rejected malformed PIN attempt");
                    return Ok(false);
                }
                verifier.verify(pin)
            }
            StoredPin::Legacy(raw) => {
                let matches = bool::from(raw.as_bytes().ct_eq(pin.as_bytes()));
                if matches {
                    self.store_verifier(pin)?;
                    info!("Upgraded stored app lock PIN to a verifier");
                }
                Ok(matches)
            }
        }
    }

    pub fn clear_pin(&self) -> Result<()> {
        self.credentials.delete(PIN_CREDENTIAL)?;
        info!("App lock PIN removed");
        Ok(())
    }

    fn load(&self) -> Result<Option<StoredPin>> {
        let Some(stored) = self.credentials.get(PIN_CREDENTIAL)? else {
            return Ok(None);
        };
        let parsed = StoredPin::parse(&stored);
        if parsed.is_none() {
            warn!("Stored app lock PIN is unreadable, treating app lock as disabled");
        }
        Ok(parsed)
    }

    fn store_verifier(&self, pin: &str) -> Result<()> {
        let verifier = PinVerifier::create(pin)?;
        self.credentials
            .set(PIN_CREDENTIAL, verifier.encode().as_bytes())
    }
}
