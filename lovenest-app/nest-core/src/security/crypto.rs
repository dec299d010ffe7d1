use aes_gcm::{
    aead::{rand_core::RngCore, Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use data_encoding::BASE64;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{NestError, Result};

const NONCE_SIZE: usize = 12;
const KEY_SIZE: usize = 32;

/// Passphrase every nest shares in `SecretMode::SharedStatic`.
///
/// It ships inside the app, so it protects messages from nobody who has the
/// app binary. Conversations from older releases were written with it in the
/// salted CBC format (see `MessageKeys::decrypt`).
pub const SHARED_PASSPHRASE: &str = "lovenest-shared-secret-placeholder";

/// Text shown in place of a message that cannot be decrypted.
pub const DECRYPTION_FAILED_PLACEHOLDER: &str = "Decryption failed";

/// A 256-bit message key, zeroized on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct MessageSecret {
    key: [u8; KEY_SIZE],
}

impl MessageSecret {
    pub fn from_bytes(key: [u8; KEY_SIZE]) -> Self {
        Self { key }
    }

    pub fn from_slice(slice: &[u8]) -> Result<Self> {
        let key: [u8; KEY_SIZE] = slice.try_into().map_err(|_| {
            NestError::Encryption(format!("Message key must be {} bytes", KEY_SIZE))
        })?;
        Ok(Self { key })
    }

    /// Stretch a passphrase into a key with SHA-256.
    pub fn from_passphrase(passphrase: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(passphrase.as_bytes());
        Self {
            key: hasher.finalize().into(),
        }
    }

    pub fn shared_default() -> Self {
        Self::from_passphrase(SHARED_PASSPHRASE)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }
}

impl std::fmt::Debug for MessageSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageSecret")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// Decryption did not produce valid text: wrong key, tampered payload or
/// not a payload at all. Carries no detail on purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Decryption failed")]
pub struct DecryptionFailed;

impl From<DecryptionFailed> for NestError {
    fn from(_: DecryptionFailed) -> Self {
        NestError::DecryptionFailed
    }
}

pub fn encrypt_content(content: &[u8], secret: &MessageSecret) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(secret.as_bytes())
        .map_err(|e| NestError::Encryption(e.to_string()))?;

    // Generate random nonce
    let mut nonce_bytes = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, content)
        .map_err(|e| NestError::Encryption(e.to_string()))?;

    // Prepend nonce to ciphertext
    let mut result = nonce_bytes.to_vec();
    result.extend(ciphertext);
    Ok(result)
}

pub fn decrypt_content(
    encrypted: &[u8],
    secret: &MessageSecret,
) -> std::result::Result<Vec<u8>, DecryptionFailed> {
    if encrypted.len() < NONCE_SIZE {
        return Err(DecryptionFailed);
    }

    let cipher = Aes256Gcm::new_from_slice(secret.as_bytes()).map_err(|_| DecryptionFailed)?;

    let (nonce_bytes, ciphertext) = encrypted.split_at(NONCE_SIZE);
    let nonce = Nonce::from_slice(nonce_bytes);

    cipher.decrypt(nonce, ciphertext).map_err(|_| DecryptionFailed)
}

/// Encrypt message text into a transport string: base64(nonce ‖ ciphertext ‖ tag).
pub fn encrypt_message(plaintext: &str, secret: &MessageSecret) -> Result<String> {
    let encrypted = encrypt_content(plaintext.as_bytes(), secret)?;
    Ok(BASE64.encode(&encrypted))
}

pub fn decrypt_message(
    ciphertext: &str,
    secret: &MessageSecret,
) -> std::result::Result<String, DecryptionFailed> {
    let encrypted = BASE64
        .decode(ciphertext.trim().as_bytes())
        .map_err(|_| DecryptionFailed)?;
    let plaintext = decrypt_content(&encrypted, secret)?;
    String::from_utf8(plaintext).map_err(|_| DecryptionFailed)
}

/// Try each secret in order; the first that authenticates wins.
pub fn decrypt_with_any(
    ciphertext: &str,
    secrets: &[MessageSecret],
) -> std::result::Result<String, DecryptionFailed> {
    secrets
        .iter()
        .find_map(|secret| decrypt_message(ciphertext, secret).ok())
        .ok_or(DecryptionFailed)
}

/// Decrypt for display: failures become [`DECRYPTION_FAILED_PLACEHOLDER`].
pub fn decrypt_or_placeholder(ciphertext: &str, secret: &MessageSecret) -> String {
    decrypt_message(ciphertext, secret).unwrap_or_else(|_| DECRYPTION_FAILED_PLACEHOLDER.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_with_shared_secret() {
        let secret = MessageSecret::shared_default();
        let long = "x".repeat(4096);
        for text in ["", "hi", "I miss you 💕", long.as_str()] {
            let encrypted = encrypt_message(text, &secret).unwrap();
            assert_eq!(decrypt_message(&encrypted, &secret).unwrap(), text);
        }
    }

    #[test]
    fn test_nonce_makes_ciphertexts_differ() {
        let secret = MessageSecret::shared_default();
        let a = encrypt_message("same", &secret).unwrap();
        let b = encrypt_message("same", &secret).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrong_secret_is_decryption_failed() {
        let encrypted = encrypt_message("secret", &MessageSecret::shared_default()).unwrap();
        let other = MessageSecret::from_passphrase("another nest");
        assert_eq!(decrypt_message(&encrypted, &other), Err(DecryptionFailed));
        assert_eq!(
            decrypt_or_placeholder(&encrypted, &other),
            DECRYPTION_FAILED_PLACEHOLDER
        );
    }

    #[test]
    fn test_malformed_ciphertext_is_decryption_failed() {
        let secret = MessageSecret::shared_default();
        for garbage in ["", "not base64 !!", "AAAA", "U2FsdGVkX1+abc="] {
            assert_eq!(decrypt_message(garbage, &secret), Err(DecryptionFailed));
        }
    }

    #[test]
    fn test_tampered_ciphertext_is_rejected() {
        let secret = MessageSecret::shared_default();
        let mut bytes = encrypt_content(b"hello", &secret).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        assert_eq!(decrypt_content(&bytes, &secret), Err(DecryptionFailed));
    }

    #[test]
    fn test_decrypt_with_any_uses_fallback() {
        let legacy = MessageSecret::shared_default();
        let nest = MessageSecret::from_bytes([7u8; 32]);
        let encrypted = encrypt_message("old message", &legacy).unwrap();
        assert_eq!(
            decrypt_with_any(&encrypted, &[nest.clone(), legacy]).unwrap(),
            "old message"
        );
        assert_eq!(decrypt_with_any(&encrypted, &[nest]), Err(DecryptionFailed));
    }

    #[test]
    fn test_debug_redacts_key() {
        let rendered = format!("{:?}", MessageSecret::from_bytes([9u8; 32]));
        assert!(rendered.contains("REDACTED"));
        assert!(!rendered.contains('9'));
    }
}
