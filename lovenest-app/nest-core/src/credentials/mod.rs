//! Secure credential storage and the app-lock PIN.
//!
//! The PIN itself is never stored: an Argon2id verifier (random salt +
//! derived key) is kept under [`PIN_CREDENTIAL`] in the credential store.

pub mod pin;
pub mod store;

pub use pin::{PinStore, PinVerifier};
pub use store::{CredentialStore, StorageProtection, PIN_CREDENTIAL};
