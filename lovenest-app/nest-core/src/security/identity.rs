use aes_gcm::aead::OsRng;
use sha2::{Digest, Sha256};
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

use super::crypto::MessageSecret;
use crate::error::{NestError, Result};
use crate::model::NestId;

/// X25519 keypair this device uses for per-nest key agreement.
pub struct DeviceKeyPair {
    pub public_key: [u8; 32],
    pub private_key: Zeroizing<[u8; 32]>,
}

impl DeviceKeyPair {
    pub fn from_private(private_key: &[u8]) -> Result<Self> {
        let private_bytes: [u8; 32] = private_key
            .try_into()
            .map_err(|_| NestError::Encryption("Private key must be 32 bytes".into()))?;
        let secret = StaticSecret::from(private_bytes);
        Ok(Self {
            public_key: *PublicKey::from(&secret).as_bytes(),
            private_key: Zeroizing::new(secret.to_bytes()),
        })
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key)
    }
}

impl std::fmt::Debug for DeviceKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceKeyPair")
            .field("public_key", &self.public_key_hex())
            .field("private_key", &"[REDACTED]")
            .finish()
    }
}

/// Generate a new X25519 keypair.
///
/// The caller persists the private half through the credential store.
pub fn generate_device_keys() -> DeviceKeyPair {
    let private_key = StaticSecret::random_from_rng(OsRng);
    let public_key = PublicKey::from(&private_key);

    DeviceKeyPair {
        public_key: *public_key.as_bytes(),
        private_key: Zeroizing::new(private_key.to_bytes()),
    }
}

/// Derive a shared secret using X25519 ECDH
/// Takes our private key and the peer's public key, returns a 32-byte shared secret
pub fn derive_shared_secret(
    our_private_key: &[u8],
    their_public_key: &[u8],
) -> Result<Zeroizing<[u8; 32]>> {
    let private_bytes: [u8; 32] = our_private_key
        .try_into()
        .map_err(|_| NestError::Encryption("Private key must be 32 bytes".into()))?;
    let public_bytes: [u8; 32] = their_public_key
        .try_into()
        .map_err(|_| NestError::Encryption("Public key must be 32 bytes".into()))?;

    let our_secret = StaticSecret::from(private_bytes);
    let their_public = PublicKey::from(public_bytes);

    let shared_secret = our_secret.diffie_hellman(&their_public);
    if !shared_secret.was_contributory() {
        return Err(NestError::Encryption("Partner public key is degenerate".into()));
    }

    Ok(Zeroizing::new(*shared_secret.as_bytes()))
}

/// Bind an ECDH output to one nest: SHA-256(shared ‖ nest id).
pub fn derive_nest_key(shared_secret: &[u8; 32], nest_id: &NestId) -> MessageSecret {
    let mut hasher = Sha256::new();
    hasher.update(shared_secret);
    hasher.update(nest_id.as_str().as_bytes());
    MessageSecret::from_bytes(hasher.finalize().into())
}
