//! Pairing, session and message confidentiality core of LoveNest.
//!
//! Two accounts pair into a [`Nest`] through a short code. A
//! [`SessionStateMachine`] composes identity, profile, nest and app-lock
//! state into one observable [`SessionState`], and the [`AppLockController`]
//! asks it to lock after inactivity. Messages are sealed with AES-256-GCM.

pub mod backend;
pub mod config;
pub mod credentials;
pub mod error;
pub mod feed;
pub mod lock;
pub mod model;
pub mod pairing;
pub mod profiles;
pub mod security;
pub mod session;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub use backend::{AuthProvider, DocumentStore, MemoryAuth, MemoryDocumentStore, Subscription};
pub use config::{load_settings, save_settings, CoreSettings, SecretMode};
pub use credentials::{CredentialStore, PinStore, StorageProtection};
pub use error::{NestError, Result};
pub use feed::{ChatFeed, ChatMessage, NestRecords};
pub use lock::{ActivitySignal, AppLockController};
pub use model::{Identity, Nest, NestId, Profile};
pub use pairing::{PairingCode, PairingCodeService, ProfileRef};
pub use profiles::ProfileRepository;
pub use security::{MessageKeys, MessageSecret, NestKeyring};
pub use session::{SessionHandle, SessionPhase, SessionState, SessionStateMachine};

/// Install the global tracing subscriber. `RUST_LOG` overrides the default
/// filter. Later calls leave the installed subscriber in place.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nest_core=debug,nest_secret=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_init_tracing_twice() {
        super::init_tracing();
        super::init_tracing();
    }
}
