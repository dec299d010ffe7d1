//! Data types describing a secure storage backend.

use serde::{Deserialize, Serialize};

/// The method used for secret storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SecretStorageMethod {
    /// macOS Keychain.
    MacOSKeychain,
    /// Windows Credential Manager.
    WindowsCredentialManager,
    /// Linux Secret Service API (GNOME Keyring, KWallet, etc.)
    LinuxSecretService,
    /// Plain JSON file in the app data directory. Not hardware or OS protected.
    PlaintextFile,
    /// Process memory only; lost on exit.
    InMemory,
}

impl SecretStorageMethod {
    /// Whether secrets stored with this method are protected by the platform
    /// (OS keyring or secure hardware) rather than ordinary file permissions.
    pub fn is_platform_protected(&self) -> bool {
        matches!(
            self,
            Self::MacOSKeychain | Self::WindowsCredentialManager | Self::LinuxSecretService
        )
    }
}

/// Status of secret storage availability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretStorageStatus {
    /// Whether the storage is available and can be used.
    pub available: bool,
    /// The method that will be used (if available).
    pub method: Option<SecretStorageMethod>,
    /// Why the storage is unavailable (if not available).
    pub unavailable_reason: Option<String>,
}

impl SecretStorageStatus {
    /// Create a status indicating storage is available.
    pub fn available(method: SecretStorageMethod) -> Self {
        Self {
            available: true,
            method: Some(method),
            unavailable_reason: None,
        }
    }

    /// Create a status indicating storage is unavailable.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            available: false,
            method: None,
            unavailable_reason: Some(reason.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_protection() {
        assert!(SecretStorageMethod::LinuxSecretService.is_platform_protected());
        assert!(!SecretStorageMethod::PlaintextFile.is_platform_protected());
        assert!(!SecretStorageMethod::InMemory.is_platform_protected());
    }

    #[test]
    fn test_status_serializes_camel_case() {
        let status = SecretStorageStatus::unavailable("locked keyring");
        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains("unavailableReason"));
        assert!(json.contains("\"available\":false"));
    }
}
