mod crypto;
mod identity;
mod keys;
mod legacy;

pub use crypto::{
    decrypt_content, decrypt_message, decrypt_or_placeholder, decrypt_with_any, encrypt_content,
    encrypt_message, DecryptionFailed, MessageSecret, DECRYPTION_FAILED_PLACEHOLDER,
    SHARED_PASSPHRASE,
};
pub use identity::{derive_nest_key, derive_shared_secret, generate_device_keys, DeviceKeyPair};
pub use keys::{MessageKeys, NestKeyring};
pub use legacy::decrypt_salted_message;
