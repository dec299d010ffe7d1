//! In-memory secret storage.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{Error, Result};
use crate::models::{SecretStorageMethod, SecretStorageStatus};
use crate::SecureStorage;

/// Secrets held in process memory. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryStorage {
    secrets: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>>> {
        self.secrets
            .lock()
            .map_err(|_| Error::Internal("memory storage lock poisoned".into()))
    }
}

impl SecureStorage for MemoryStorage {
    fn check_availability(&self) -> SecretStorageStatus {
        SecretStorageStatus::available(SecretStorageMethod::InMemory)
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, secret: &[u8]) -> Result<()> {
        self.lock()?.insert(key.to_string(), secret.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.lock()?.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_delete() {
        let storage = MemoryStorage::new();
        assert_eq!(storage.get("app_pin").unwrap(), None);

        storage.set("app_pin", b"secret").unwrap();
        assert_eq!(storage.get("app_pin").unwrap(), Some(b"secret".to_vec()));

        storage.delete("app_pin").unwrap();
        storage.delete("app_pin").unwrap();
        assert_eq!(storage.get("app_pin").unwrap(), None);
    }
}
