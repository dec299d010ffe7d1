//! Secure key-value storage for small secrets (PIN verifiers, device keys).
//!
//! Backends:
//! - [`KeyringStorage`]: OS keyring, only with the `os-keyring` feature
//! - [`FileStorage`]: plaintext JSON file, the weaker fallback when no keyring exists
//! - [`MemoryStorage`]: process-local, for tests and ephemeral sessions
//!
//! Callers that care about the protection level must inspect
//! [`SecureStorage::check_availability`]; a file store is never reported as
//! platform protected.

mod error;
mod file;
#[cfg(feature = "os-keyring")]
mod os_keyring;
mod memory;
mod models;

pub use error::{Error, Result};
pub use file::{FileStorage, SECRETS_FILE_NAME};
#[cfg(feature = "os-keyring")]
pub use os_keyring::KeyringStorage;
pub use memory::MemoryStorage;
pub use models::*;

/// A named-secret store.
///
/// Implementations are synchronous: the platform APIs behind them
/// (keychain, credential manager, small files) are.
pub trait SecureStorage: Send + Sync {
    /// Check what this backend can offer on the current platform.
    fn check_availability(&self) -> SecretStorageStatus;

    /// Read the secret stored under `key`, `None` when absent.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store `secret` under `key`, replacing any previous value.
    fn set(&self, key: &str, secret: &[u8]) -> Result<()>;

    /// Remove the secret stored under `key`. Idempotent.
    fn delete(&self, key: &str) -> Result<()>;
}

/// Base64 encode bytes to string.
pub(crate) fn base64_encode(data: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(data)
}

/// Base64 decode string to bytes.
pub(crate) fn base64_decode(encoded: &str) -> Result<Vec<u8>> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| Error::Encoding(e.to_string()))
}
