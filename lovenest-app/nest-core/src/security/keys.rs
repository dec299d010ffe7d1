use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use super::crypto::{
    decrypt_with_any, encrypt_message, DecryptionFailed, MessageSecret,
    DECRYPTION_FAILED_PLACEHOLDER, SHARED_PASSPHRASE,
};
use super::legacy::{decrypt_salted_message, is_salted_payload};
use super::identity::{derive_nest_key, derive_shared_secret, generate_device_keys, DeviceKeyPair};
use crate::backend::{Document, DocumentStore};
use crate::config::SecretMode;
use crate::credentials::CredentialStore;
use crate::error::{NestError, Result};
use crate::model::{fields, Identity, Nest, NestId};
use crate::profiles::ProfileRepository;

/// Keys for one nest: `encrypt` for outgoing content, `decrypt` tried in order
/// for incoming content. Salted payloads from older releases are opened with
/// `legacy_passphrase`.
#[derive(Debug, Clone)]
pub struct MessageKeys {
    pub encrypt: MessageSecret,
    pub decrypt: Vec<MessageSecret>,
    pub legacy_passphrase: Option<&'static str>,
}

impl MessageKeys {
    /// The app-wide static secret, shared by every installation.
    pub fn shared() -> Self {
        let secret = MessageSecret::shared_default();
        Self {
            decrypt: vec![secret.clone()],
            encrypt: secret,
            legacy_passphrase: Some(SHARED_PASSPHRASE),
        }
    }

    fn per_nest(key: MessageSecret, previous: Option<MessageSecret>) -> Self {
        let mut decrypt = vec![key.clone()];
        decrypt.extend(previous);
        decrypt.push(MessageSecret::shared_default());
        Self {
            decrypt,
            encrypt: key,
            legacy_passphrase: Some(SHARED_PASSPHRASE),
        }
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        encrypt_message(plaintext, &self.encrypt)
    }

    pub fn decrypt(&self, ciphertext: &str) -> std::result::Result<String, DecryptionFailed> {
        if let Some(passphrase) = self.legacy_passphrase {
            if is_salted_payload(ciphertext) {
                if let Ok(text) = decrypt_salted_message(ciphertext, passphrase) {
                    return Ok(text);
                }
            }
        }
        decrypt_with_any(ciphertext, &self.decrypt)
    }

    pub fn decrypt_or_placeholder(&self, ciphertext: &str) -> String {
        self.decrypt(ciphertext)
            .unwrap_or_else(|_| DECRYPTION_FAILED_PLACEHOLDER.to_string())
    }
}

/// Resolves the message keys of a nest according to the configured
/// [`SecretMode`], keeping device and nest keys in the credential store.
#[derive(Clone)]
pub struct NestKeyring {
    credentials: Arc<CredentialStore>,
    profiles: ProfileRepository,
    mode: SecretMode,
}

impl NestKeyring {
    pub fn new(
        credentials: Arc<CredentialStore>,
        store: Arc<dyn DocumentStore>,
        mode: SecretMode,
    ) -> Self {
        Self {
            credentials,
            profiles: ProfileRepository::new(store),
            mode,
        }
    }

    pub fn mode(&self) -> SecretMode {
        self.mode
    }

    /// Load this device's keypair for `identity`, generating and storing it
    /// on first use.
    pub fn ensure_device_key(&self, identity: &Identity) -> Result<DeviceKeyPair> {
        let name = device_key_name(identity);
        if let Some(private) = self.credentials.get(&name)? {
            return DeviceKeyPair::from_private(&private);
        }

        let keys = generate_device_keys();
        self.credentials.set(&name, &*keys.private_key)?;
        info!("Generated device key for {}", identity);
        Ok(keys)
    }

    /// Make sure the profile carries this device's public key.
    pub async fn publish_public_key(&self, identity: &Identity) -> Result<String> {
        let keys = self.ensure_device_key(identity)?;
        let public_hex = keys.public_key_hex();

        let profile = self.profiles.get(identity).await?;
        if profile.public_key.as_deref() != Some(public_hex.as_str()) {
            let mut update = Document::new();
            update.insert(fields::PUBLIC_KEY.into(), Value::String(public_hex.clone()));
            self.profiles.update(identity, update).await?;
            debug!("Published public key for {}", identity);
        }
        Ok(public_hex)
    }

    /// Message keys `identity` uses inside `nest`.
    ///
    /// In per-nest mode the key comes from ECDH with the partner's published
    /// public key. The derived key is cached together with the partner key it
    /// was derived from; when the partner publishes a different key the nest
    /// key is derived again and the old one is kept for decryption only.
    /// Until the partner has published a key the shared secret is used.
    pub async fn keys_for(&self, identity: &Identity, nest: &Nest) -> Result<MessageKeys> {
        if self.mode == SecretMode::SharedStatic {
            return Ok(MessageKeys::shared());
        }

        let partner = nest.partner_of(identity).ok_or_else(|| {
            NestError::InvalidNest(format!("{} is not a member of nest {}", identity, nest.id))
        })?;

        let cached = self.cached_nest_key(&nest.id)?;
        let previous = self.previous_nest_key(&nest.id)?;

        let partner_profile = self.profiles.get(partner).await?;
        let Some(partner_hex) = partner_profile.public_key else {
            if let Some(key) = cached {
                return Ok(MessageKeys::per_nest(key, previous));
            }
            warn!("Partner {} has no public key yet, using shared secret", partner);
            return Ok(MessageKeys::shared());
        };

        let cached_peer = self.credentials.get(&nest_peer_name(&nest.id))?;
        if let Some(key) = &cached {
            if cached_peer.as_deref().map(|peer| &peer[..]) == Some(partner_hex.as_bytes()) {
                return Ok(MessageKeys::per_nest(key.clone(), previous));
            }
        }

        let partner_public = hex::decode(&partner_hex)
            .map_err(|e| NestError::Encryption(format!("Partner public key is not hex: {}", e)))?;
        let device = self.ensure_device_key(identity)?;
        let shared = derive_shared_secret(&*device.private_key, &partner_public)?;
        let key = derive_nest_key(&shared, &nest.id);

        let previous = match cached {
            Some(old) if old != key => {
                self.credentials
                    .set(&nest_previous_name(&nest.id), old.as_bytes())?;
                info!("Partner key changed, re-derived message key for nest {}", nest.id);
                Some(old)
            }
            Some(_) => previous,
            None => {
                info!("Derived message key for nest {}", nest.id);
                previous
            }
        };
        self.credentials.set(&nest_key_name(&nest.id), key.as_bytes())?;
        self.credentials
            .set(&nest_peer_name(&nest.id), partner_hex.as_bytes())?;

        Ok(MessageKeys::per_nest(key, previous))
    }

    fn cached_nest_key(&self, nest: &NestId) -> Result<Option<MessageSecret>> {
        self.credentials
            .get(&nest_key_name(nest))?
            .map(|bytes| MessageSecret::from_slice(&bytes))
            .transpose()
    }

    fn previous_nest_key(&self, nest: &NestId) -> Result<Option<MessageSecret>> {
        self.credentials
            .get(&nest_previous_name(nest))?
            .map(|bytes| MessageSecret::from_slice(&bytes))
            .transpose()
    }

    /// Forget every cached key of `nest`.
    pub fn forget_nest_key(&self, nest: &NestId) -> Result<()> {
        self.credentials.delete(&nest_key_name(nest))?;
        self.credentials.delete(&nest_peer_name(nest))?;
        self.credentials.delete(&nest_previous_name(nest))
    }
}

fn device_key_name(identity: &Identity) -> String {
    format!("device_key.{}", identity.uid())
}

fn nest_key_name(nest: &NestId) -> String {
    format!("nest_key.{}", nest.as_str())
}

fn nest_peer_name(nest: &NestId) -> String {
    format!("nest_peer.{}", nest.as_str())
}

fn nest_previous_name(nest: &NestId) -> String {
    format!("nest_key_previous.{}", nest.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryDocumentStore;
    use chrono::Utc;

    async fn couple(
        mode: SecretMode,
    ) -> (MemoryDocumentStore, NestKeyring, NestKeyring, Nest, Identity, Identity) {
        let store = MemoryDocumentStore::new();
        let shared: Arc<dyn DocumentStore> = Arc::new(store.clone());
        let profiles = ProfileRepository::new(shared.clone());
        let alice = Identity::new("alice");
        let bob = Identity::new("bob");
        profiles.register(&alice, "a@example.com").await.unwrap();
        profiles.register(&bob, "b@example.com").await.unwrap();

        let nest = Nest::new(NestId::generate(), alice.clone(), bob.clone(), Utc::now()).unwrap();
        let on_alice = NestKeyring::new(Arc::new(CredentialStore::in_memory()), shared.clone(), mode);
        let on_bob = NestKeyring::new(Arc::new(CredentialStore::in_memory()), shared, mode);
        (store, on_alice, on_bob, nest, alice, bob)
    }

    #[tokio::test]
    async fn test_shared_mode_uses_static_secret() {
        let (_store, on_alice, on_bob, nest, alice, bob) = couple(SecretMode::SharedStatic).await;
        let a = on_alice.keys_for(&alice, &nest).await.unwrap();
        let b = on_bob.keys_for(&bob, &nest).await.unwrap();
        assert_eq!(a.encrypt, MessageSecret::shared_default());

        let sealed = a.encrypt("hello").unwrap();
        assert_eq!(b.decrypt(&sealed).unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_per_nest_keys_agree_once_both_published() {
        let (_store, on_alice, on_bob, nest, alice, bob) = couple(SecretMode::PerNest).await;
        on_alice.publish_public_key(&alice).await.unwrap();
        on_bob.publish_public_key(&bob).await.unwrap();

        let a = on_alice.keys_for(&alice, &nest).await.unwrap();
        let b = on_bob.keys_for(&bob, &nest).await.unwrap();
        assert_eq!(a.encrypt, b.encrypt);
        assert_ne!(a.encrypt, MessageSecret::shared_default());

        let sealed = b.encrypt("per nest").unwrap();
        assert_eq!(a.decrypt(&sealed).unwrap(), "per nest");
    }

    #[tokio::test]
    async fn test_per_nest_falls_back_until_partner_publishes() {
        let (_store, on_alice, _on_bob, nest, alice, _bob) = couple(SecretMode::PerNest).await;
        on_alice.publish_public_key(&alice).await.unwrap();

        let keys = on_alice.keys_for(&alice, &nest).await.unwrap();
        assert_eq!(keys.encrypt, MessageSecret::shared_default());
    }

    #[tokio::test]
    async fn test_per_nest_still_reads_shared_history() {
        let (_store, on_alice, on_bob, nest, alice, bob) = couple(SecretMode::PerNest).await;
        let old = MessageKeys::shared().encrypt("from before").unwrap();

        on_alice.publish_public_key(&alice).await.unwrap();
        on_bob.publish_public_key(&bob).await.unwrap();
        let keys = on_alice.keys_for(&alice, &nest).await.unwrap();
        assert_eq!(keys.decrypt(&old).unwrap(), "from before");
        assert_eq!(keys.decrypt_or_placeholder("garbage"), DECRYPTION_FAILED_PLACEHOLDER);
    }

    #[tokio::test]
    async fn test_salted_history_is_readable_in_both_modes() {
        let salted = "U2FsdGVkX19ntH8YsB9yvkVPrdqHZoqKA94MYyILVLA=";
        assert_eq!(MessageKeys::shared().decrypt(salted).unwrap(), "hello love");

        let (_store, on_alice, on_bob, nest, alice, bob) = couple(SecretMode::PerNest).await;
        on_alice.publish_public_key(&alice).await.unwrap();
        on_bob.publish_public_key(&bob).await.unwrap();
        let keys = on_alice.keys_for(&alice, &nest).await.unwrap();
        assert_eq!(keys.decrypt_or_placeholder(salted), "hello love");
    }

    #[tokio::test]
    async fn test_partner_key_change_rederives_nest_key() {
        let (store, on_alice, _on_bob, nest, alice, bob) = couple(SecretMode::PerNest).await;
        on_alice.publish_public_key(&alice).await.unwrap();
        let device = || {
            NestKeyring::new(
                Arc::new(CredentialStore::in_memory()),
                Arc::new(store.clone()),
                SecretMode::PerNest,
            )
        };

        // Bob on his first phone.
        let first_phone = device();
        first_phone.publish_public_key(&bob).await.unwrap();
        let before = on_alice.keys_for(&alice, &nest).await.unwrap();
        let old_message = before.encrypt("sent before the new phone").unwrap();
        assert_eq!(
            on_alice.keys_for(&alice, &nest).await.unwrap().encrypt,
            before.encrypt
        );

        // Bob reinstalls and publishes a fresh device key.
        let new_phone = device();
        new_phone.publish_public_key(&bob).await.unwrap();

        let after = on_alice.keys_for(&alice, &nest).await.unwrap();
        let on_new_phone = new_phone.keys_for(&bob, &nest).await.unwrap();
        assert_ne!(after.encrypt, before.encrypt);
        assert_eq!(after.encrypt, on_new_phone.encrypt);
        assert_eq!(after.decrypt(&old_message).unwrap(), "sent before the new phone");

        let fresh = on_new_phone.encrypt("hi from the new phone").unwrap();
        assert_eq!(after.decrypt(&fresh).unwrap(), "hi from the new phone");
    }

    #[tokio::test]
    async fn test_forget_nest_key_clears_cache() {
        let (_store, on_alice, on_bob, nest, alice, bob) = couple(SecretMode::PerNest).await;
        on_alice.publish_public_key(&alice).await.unwrap();
        on_bob.publish_public_key(&bob).await.unwrap();
        on_alice.keys_for(&alice, &nest).await.unwrap();
        assert!(on_alice.credentials.contains(&nest_key_name(&nest.id)).unwrap());

        on_alice.forget_nest_key(&nest.id).unwrap();
        assert!(!on_alice.credentials.contains(&nest_key_name(&nest.id)).unwrap());
        assert!(!on_alice.credentials.contains(&nest_peer_name(&nest.id)).unwrap());
    }

    #[tokio::test]
    async fn test_device_key_is_stable_and_public_key_published() {
        let (store, on_alice, _on_bob, _nest, alice, _bob) = couple(SecretMode::PerNest).await;
        let first = on_alice.ensure_device_key(&alice).unwrap();
        let second = on_alice.ensure_device_key(&alice).unwrap();
        assert_eq!(first.public_key, second.public_key);

        let published = on_alice.publish_public_key(&alice).await.unwrap();
        let doc = store
            .document(&crate::backend::DocumentPath::profile(&alice))
            .unwrap();
        assert_eq!(doc.get(fields::PUBLIC_KEY), Some(&Value::String(published)));
    }

    #[tokio::test]
    async fn test_keys_for_non_member_is_rejected() {
        let (_store, on_alice, _on_bob, nest, _alice, _bob) = couple(SecretMode::PerNest).await;
        let err = on_alice
            .keys_for(&Identity::new("mallory"), &nest)
            .await
            .unwrap_err();
        assert!(matches!(err, NestError::InvalidNest(_)));
    }
}
