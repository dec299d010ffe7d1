use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::driver::{SessionDriver, SessionEvent};
use super::state::SessionState;
use crate::backend::{AuthProvider, DocumentStore};
use crate::config::{CoreSettings, SecretMode};
use crate::credentials::{CredentialStore, PinStore};
use crate::error::{NestError, Result};
use crate::feed::{ChatFeed, NestRecords};
use crate::model::{Identity, Nest};
use crate::pairing::{PairingCode, PairingCodeService};
use crate::security::{MessageKeys, NestKeyring};

/// Owns the session driver task. Consumers talk to it through
/// [`SessionHandle`]s.
pub struct SessionStateMachine {
    handle: SessionHandle,
    driver: Option<SessionDriver>,
    task: Option<JoinHandle<()>>,
    stopped: bool,
}

impl SessionStateMachine {
    pub fn new(
        auth: Arc<dyn AuthProvider>,
        store: Arc<dyn DocumentStore>,
        credentials: Arc<CredentialStore>,
        settings: &CoreSettings,
    ) -> Result<Self> {
        settings.validate()?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SessionState::bootstrapping());
        let pins = PinStore::new(credentials.clone(), settings.pin_length);

        let driver = SessionDriver::new(
            auth,
            store.clone(),
            pins.clone(),
            events_tx.clone(),
            events_rx,
            state_tx,
        );
        let handle = SessionHandle {
            events_tx,
            state_rx,
            pins,
            keyring: NestKeyring::new(credentials, store.clone(), settings.secret_mode),
            pairing: PairingCodeService::new(store.clone(), settings.pairing_code_length),
            store,
        };

        Ok(Self {
            handle,
            driver: Some(driver),
            task: None,
            stopped: false,
        })
    }

    /// Spawn the driver on the current tokio runtime. Starting a running
    /// machine again is a no-op.
    pub fn start(&mut self) -> Result<SessionHandle> {
        if self.stopped {
            return Err(NestError::SessionStopped);
        }
        if let Some(driver) = self.driver.take() {
            self.task = Some(tokio::spawn(driver.run()));
            info!("Session started");
        }
        Ok(self.handle.clone())
    }

    /// Release every subscription and wait for the driver to exit.
    pub async fn stop(&mut self) {
        self.stopped = true;
        self.driver = None;
        let _ = self.handle.events_tx.send(SessionEvent::Stop);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Session driver ended abnormally: {}", e);
            }
        }
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    pub fn state(&self) -> SessionState {
        self.handle.state()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.handle.subscribe()
    }
}

impl Drop for SessionStateMachine {
    fn drop(&mut self) {
        let _ = self.handle.events_tx.send(SessionEvent::Stop);
    }
}

/// Cloneable entry point for the UI layer: read the state, observe changes,
/// and request lock, unlock or pairing.
#[derive(Clone)]
pub struct SessionHandle {
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    state_rx: watch::Receiver<SessionState>,
    pins: PinStore,
    keyring: NestKeyring,
    pairing: PairingCodeService,
    store: Arc<dyn DocumentStore>,
}

impl SessionHandle {
    pub fn state(&self) -> SessionState {
        self.state_rx.borrow().clone()
    }

    /// A receiver that sees every published state.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state_rx.clone()
    }

    /// Wait until the published state satisfies `predicate`.
    pub async fn wait_for(
        &self,
        mut predicate: impl FnMut(&SessionState) -> bool,
    ) -> Result<SessionState> {
        let mut rx = self.state_rx.clone();
        let state = rx
            .wait_for(|state| predicate(state))
            .await
            .map_err(|_| NestError::SessionStopped)?;
        Ok(state.clone())
    }

    fn send(&self, event: SessionEvent) -> Result<()> {
        self.events_tx
            .send(event)
            .map_err(|_| NestError::SessionStopped)
    }

    /// Lock now, if signed in and a PIN is set. Returns whether the session
    /// is locked afterwards.
    pub async fn request_lock(&self) -> Result<bool> {
        let (reply, response) = oneshot::channel();
        self.send(SessionEvent::RequestLock { reply })?;
        response.await.map_err(|_| NestError::SessionStopped)
    }

    pub async fn unlock(&self, pin: &str) -> Result<()> {
        let identity = self.state().identity.ok_or(NestError::NotAuthenticated)?;
        let pins = self.pins.clone();
        let attempt = pin.to_string();
        if !run_blocking(move || pins.verify_pin(&attempt)).await? {
            warn!("Wrong PIN entered");
            return Err(NestError::InvalidPin);
        }

        let (reply, response) = oneshot::channel();
        self.send(SessionEvent::Unlock { identity, reply })?;
        if !response.await.map_err(|_| NestError::SessionStopped)? {
            return Err(NestError::NotAuthenticated);
        }
        Ok(())
    }

    /// Opt into app lock with a new PIN. Takes effect on the next inactivity
    /// timeout or sign-in.
    pub async fn enable_lock(&self, pin: &str) -> Result<()> {
        let state = self.state();
        if state.identity.is_none() {
            return Err(NestError::NotAuthenticated);
        }
        if state.locked {
            return Err(NestError::Locked);
        }
        let pins = self.pins.clone();
        let pin = pin.to_string();
        run_blocking(move || pins.set_pin(&pin)).await
    }

    /// Turn app lock off. The current PIN is required; the session is
    /// unlocked afterwards.
    pub async fn disable_lock(&self, pin: &str) -> Result<()> {
        let pins = self.pins.clone();
        let pin = pin.to_string();
        let cleared = run_blocking(move || {
            if !pins.has_pin()? {
                return Ok(false);
            }
            if !pins.verify_pin(&pin)? {
                return Err(NestError::InvalidPin);
            }
            pins.clear_pin()?;
            Ok(true)
        })
        .await?;
        if cleared {
            self.send(SessionEvent::LockDisabled)?;
        }
        Ok(())
    }

    /// Reads the credential store; may block on the OS keyring.
    pub fn has_pin(&self) -> Result<bool> {
        self.pins.has_pin()
    }

    /// Publish and return the signed-in user's pairing code.
    pub async fn issue_code(&self) -> Result<PairingCode> {
        let identity = self.unlocked_identity()?;
        let code = self.pairing.issue_code(&identity).await?;
        self.publish_key_if_needed(&identity).await?;
        Ok(code)
    }

    /// Pair the signed-in user with the owner of `code`. The new nest shows
    /// up in the state once the profile listener delivers it.
    pub async fn pair(&self, code: &str) -> Result<Nest> {
        let identity = self.unlocked_identity()?;
        self.publish_key_if_needed(&identity).await?;
        self.pairing.pair(&identity, code).await
    }

    /// Keys for the current nest's messages.
    pub async fn message_keys(&self) -> Result<MessageKeys> {
        let (identity, nest) = self.paired()?;
        self.publish_key_if_needed(&identity).await?;
        self.keyring.keys_for(&identity, &nest).await
    }

    pub async fn chat(&self) -> Result<ChatFeed> {
        let keys = self.message_keys().await?;
        let (identity, nest) = self.paired()?;
        Ok(ChatFeed::new(self.store.clone(), &nest.id, identity, keys))
    }

    pub fn records(&self) -> Result<NestRecords> {
        let (identity, nest) = self.paired()?;
        Ok(NestRecords::new(self.store.clone(), nest.id, identity))
    }

    fn unlocked_identity(&self) -> Result<Identity> {
        let state = self.state();
        let identity = state.identity.ok_or(NestError::NotAuthenticated)?;
        if state.locked {
            return Err(NestError::Locked);
        }
        Ok(identity)
    }

    fn paired(&self) -> Result<(Identity, Nest)> {
        let state = self.state();
        let identity = state.identity.ok_or(NestError::NotAuthenticated)?;
        if state.locked {
            return Err(NestError::Locked);
        }
        let nest = state
            .nest
            .ok_or_else(|| NestError::NotFound("nest for the current session".into()))?;
        Ok((identity, nest))
    }

    async fn publish_key_if_needed(&self, identity: &Identity) -> Result<()> {
        if self.keyring.mode() == SecretMode::PerNest {
            self.keyring.publish_public_key(identity).await?;
        }
        Ok(())
    }
}

/// Argon2 and keyring work stays off the async workers.
async fn run_blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| NestError::StorageUnavailable(format!("PIN worker failed: {}", e)))?
}
