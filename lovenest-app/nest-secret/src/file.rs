//! Plaintext file fallback for platforms without a usable keyring.
//!
//! Secrets are kept base64-encoded in a single JSON object. The file is
//! written atomically (temp file + rename) and restricted to the owner on
//! Unix, but it is NOT encrypted: anyone who can read the app data
//! directory can read the secrets.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::models::{SecretStorageMethod, SecretStorageStatus};
use crate::{base64_decode, base64_encode, SecureStorage};

/// Default file name inside the data directory.
pub const SECRETS_FILE_NAME: &str = "secrets.json";

pub struct FileStorage {
    path: PathBuf,
    /// Serializes read-modify-write cycles within this process.
    write_guard: Mutex<()>,
}

impl FileStorage {
    /// Store secrets in `data_dir/secrets.json`.
    pub fn in_dir(data_dir: &Path) -> Self {
        Self::new(data_dir.join(SECRETS_FILE_NAME))
    }

    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_guard: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = std::fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        Ok(serde_json::from_str(&content)?)
    }

    fn write_all(&self, secrets: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_vec_pretty(secrets)?;
        let temp_path = self.path.with_extension("json.tmp");
        std::fs::write(&temp_path, &content)?;
        std::fs::rename(&temp_path, &self.path)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = std::fs::metadata(&self.path)?.permissions();
            perms.set_mode(0o600);
            std::fs::set_permissions(&self.path, perms)?;
        }

        Ok(())
    }

    fn guard(&self) -> Result<std::sync::MutexGuard<'_, ()>> {
        self.write_guard
            .lock()
            .map_err(|_| Error::Internal("file storage lock poisoned".into()))
    }
}

impl SecureStorage for FileStorage {
    fn check_availability(&self) -> SecretStorageStatus {
        let dir = match self.path.parent() {
            Some(dir) => dir,
            None => return SecretStorageStatus::unavailable("secrets path has no parent"),
        };
        if let Err(e) = std::fs::create_dir_all(dir) {
            warn!("Secrets directory {:?} not writable: {}", dir, e);
            return SecretStorageStatus::unavailable(format!("data directory not writable: {}", e));
        }
        SecretStorageStatus::available(SecretStorageMethod::PlaintextFile)
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let _guard = self.guard()?;
        match self.read_all()?.get(key) {
            Some(encoded) => base64_decode(encoded).map(Some),
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, secret: &[u8]) -> Result<()> {
        let _guard = self.guard()?;
        let mut secrets = self.read_all()?;
        secrets.insert(key.to_string(), base64_encode(secret));
        self.write_all(&secrets)?;
        debug!("Stored secret '{}' in plaintext file {:?}", key, self.path);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let _guard = self.guard()?;
        let mut secrets = self.read_all()?;
        if secrets.remove(key).is_some() {
            self.write_all(&secrets)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "nest-secret-{}-{}-{}",
            name,
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_values_survive_reopen() {
        let dir = temp_dir("reopen");
        let storage = FileStorage::in_dir(&dir);
        storage.set("app_pin", &[1, 2, 3]).unwrap();
        storage.set("nest_key.abc", b"key").unwrap();

        let reopened = FileStorage::in_dir(&dir);
        assert_eq!(reopened.get("app_pin").unwrap(), Some(vec![1, 2, 3]));
        assert_eq!(reopened.get("nest_key.abc").unwrap(), Some(b"key".to_vec()));

        reopened.delete("app_pin").unwrap();
        assert_eq!(storage.get("app_pin").unwrap(), None);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_reports_plaintext_method() {
        let dir = temp_dir("status");
        let status = FileStorage::in_dir(&dir).check_availability();
        assert!(status.available);
        assert_eq!(status.method, Some(SecretStorageMethod::PlaintextFile));
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_corrupt_file_is_encoding_error() {
        let dir = temp_dir("corrupt");
        std::fs::write(dir.join(SECRETS_FILE_NAME), "not json").unwrap();
        let err = FileStorage::in_dir(&dir).get("app_pin").unwrap_err();
        assert!(matches!(err, Error::Encoding(_)));
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = temp_dir("perms");
        let storage = FileStorage::in_dir(&dir);
        storage.set("app_pin", b"x").unwrap();
        let mode = std::fs::metadata(storage.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
