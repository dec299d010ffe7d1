use std::path::Path;

use nest_secret::{
    FileStorage, MemoryStorage, SecretStorageMethod, SecretStorageStatus, SecureStorage,
};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::config::CoreSettings;
use crate::error::Result;

/// Fixed credential name of the app-lock PIN verifier.
pub const PIN_CREDENTIAL: &str = "app_pin";

/// How well the credential store protects what it holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageProtection {
    /// OS keyring or secure hardware.
    Platform,
    /// Ordinary file in the app data directory (owner-only permissions).
    /// Weaker: readable by anything running as the user.
    PlaintextFile,
    /// Process memory; gone on restart.
    Ephemeral,
}

/// Named secrets in platform storage, with an explicit protection level.
pub struct CredentialStore {
    storage: Box<dyn SecureStorage>,
    status: SecretStorageStatus,
}

impl CredentialStore {
    pub fn new(storage: Box<dyn SecureStorage>) -> Self {
        let status = storage.check_availability();
        debug!("Credential storage status: {:?}", status);
        Self { storage, status }
    }

    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryStorage::new()))
    }

    /// Prefer the OS keyring; fall back to a plaintext file in `data_dir`
    /// when the keyring is missing or unusable.
    pub fn open(settings: &CoreSettings, data_dir: &Path) -> Self {
        #[cfg(feature = "os-keyring")]
        {
            let keyring = nest_secret::KeyringStorage::new(settings.keyring_service.clone());
            let status = keyring.check_availability();
            if status.available {
                info!("Using OS keyring for credentials ({:?})", status.method);
                return Self {
                    storage: Box::new(keyring),
                    status,
                };
            }
            warn!(
                "OS keyring unavailable ({}), falling back to plaintext file storage",
                status.unavailable_reason.as_deref().unwrap_or("unknown reason")
            );
        }
        #[cfg(not(feature = "os-keyring"))]
        {
            let _ = settings;
            warn!("Built without OS keyring support, credentials use plaintext file storage");
        }

        let store = Self::new(Box::new(FileStorage::in_dir(data_dir)));
        info!("Credentials stored at {:?}", data_dir);
        store
    }

    pub fn status(&self) -> &SecretStorageStatus {
        &self.status
    }

    pub fn protection(&self) -> StorageProtection {
        match self.status.method {
            Some(method) if method.is_platform_protected() => StorageProtection::Platform,
            Some(SecretStorageMethod::InMemory) => StorageProtection::Ephemeral,
            _ => StorageProtection::PlaintextFile,
        }
    }

    pub fn get(&self, name: &str) -> Result<Option<Zeroizing<Vec<u8>>>> {
        Ok(self.storage.get(name)?.map(Zeroizing::new))
    }

    pub fn set(&self, name: &str, secret: &[u8]) -> Result<()> {
        self.storage.set(name, secret)?;
        Ok(())
    }

    pub fn delete(&self, name: &str) -> Result<()> {
        self.storage.delete(name)?;
        Ok(())
    }

    pub fn contains(&self, name: &str) -> Result<bool> {
        Ok(self.storage.get(name)?.is_some())
    }
}
