//! OS keyring backend.
//!
//! - **macOS**: Keychain Access
//! - **Windows**: Credential Manager
//! - **Linux**: Secret Service API (GNOME Keyring, KWallet)

use ::keyring::Entry;
use tracing::{debug, error, info, warn};

use crate::error::Error;
use crate::models::*;
use crate::{base64_decode, base64_encode, SecureStorage};

/// Account used to probe keyring availability.
const PROBE_ACCOUNT: &str = "availability-probe";

/// Secrets stored in the OS keyring, one entry per key under a service name.
pub struct KeyringStorage {
    service: String,
}

impl KeyringStorage {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, key: &str) -> crate::Result<Entry> {
        Entry::new(&self.service, key).map_err(|e| {
            error!("Failed to create keyring entry: {}", e);
            Self::map_keyring_error(e)
        })
    }

    /// Get the appropriate storage method for the current platform.
    fn get_platform_method() -> SecretStorageMethod {
        #[cfg(target_os = "macos")]
        {
            SecretStorageMethod::MacOSKeychain
        }
        #[cfg(target_os = "windows")]
        {
            SecretStorageMethod::WindowsCredentialManager
        }
        #[cfg(not(any(target_os = "macos", target_os = "windows")))]
        {
            SecretStorageMethod::LinuxSecretService
        }
    }

    /// Map keyring errors to our error type.
    fn map_keyring_error(err: ::keyring::Error) -> Error {
        match err {
            ::keyring::Error::NoEntry => Error::SecretNotFound,
            ::keyring::Error::Ambiguous(_) => {
                Error::Internal("Multiple keyring entries found".into())
            }
            ::keyring::Error::NoStorageAccess(e) => {
                Error::NotAvailable(format!("Keyring access denied: {:?}", e))
            }
            ::keyring::Error::PlatformFailure(e) => {
                let msg = format!("{:?}", e);
                if msg.contains("Dbus") || msg.contains("dbus") || msg.contains("D-Bus") {
                    Error::NotAvailable(format!(
                        "System keyring not available (D-Bus error): {}",
                        msg
                    ))
                } else {
                    Error::Internal(format!("Keyring error: {:?}", e))
                }
            }
            ::keyring::Error::BadEncoding(e) => {
                Error::Encoding(format!("Keyring encoding error: {:?}", e))
            }
            _ => Error::Internal(format!("Keyring error: {}", err)),
        }
    }
}

impl SecureStorage for KeyringStorage {
    fn check_availability(&self) -> SecretStorageStatus {
        debug!("Checking keyring availability for service: {}", self.service);

        let entry = match Entry::new(&self.service, PROBE_ACCOUNT) {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Keyring not available: {}", e);
                return SecretStorageStatus::unavailable(format!(
                    "OS keyring not available: {}",
                    e
                ));
            }
        };
        let method = Self::get_platform_method();
        match entry.get_password() {
            Ok(_) | Err(::keyring::Error::NoEntry) => SecretStorageStatus::available(method),
            Err(e) => {
                warn!("Keyring not accessible: {:?}", e);
                SecretStorageStatus::unavailable(format!("OS keyring not accessible: {}", e))
            }
        }
    }

    fn get(&self, key: &str) -> crate::Result<Option<Vec<u8>>> {
        let encoded = match self.entry(key)?.get_password() {
            Ok(password) => password,
            Err(::keyring::Error::NoEntry) => return Ok(None),
            Err(e) => {
                error!("Failed to retrieve secret from keyring: {:?}", e);
                return Err(Self::map_keyring_error(e));
            }
        };

        base64_decode(&encoded).map(Some)
    }

    /// The secret is stored as base64 since keyring APIs expect strings.
    fn set(&self, key: &str, secret: &[u8]) -> crate::Result<()> {
        let encoded = base64_encode(secret);
        self.entry(key)?.set_password(&encoded).map_err(|e| {
            error!("Failed to store secret in keyring: {:?}", e);
            Self::map_keyring_error(e)
        })?;

        // Read back through a fresh Entry so a cached value can't mask a failed write
        match self.entry(key)?.get_password() {
            Ok(readback) if readback == encoded => {
                info!("Secret '{}' stored in OS keyring", key);
                Ok(())
            }
            Ok(_) => Err(Error::Internal(
                "Keyring verification failed: data mismatch".into(),
            )),
            Err(e) => Err(Error::Internal(format!(
                "Keyring verification failed: {:?}",
                e
            ))),
        }
    }

    fn delete(&self, key: &str) -> crate::Result<()> {
        match self.entry(key)?.delete_credential() {
            Ok(()) => {
                info!("Secret '{}' deleted from OS keyring", key);
                Ok(())
            }
            Err(::keyring::Error::NoEntry) => {
                debug!("No secret '{}' to delete", key);
                Ok(())
            }
            Err(e) => {
                error!("Failed to delete secret from keyring: {:?}", e);
                Err(Self::map_keyring_error(e))
            }
        }
    }
}
