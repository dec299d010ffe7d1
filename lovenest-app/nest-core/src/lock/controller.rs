use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::config::CoreSettings;
use crate::error::{NestError, Result};
use crate::model::Identity;
use crate::session::{SessionHandle, SessionState};

/// User interaction and app visibility signals from the UI layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivitySignal {
    TouchStart,
    TouchMove,
    Foreground,
    Background,
}

/// Requests a session lock after a period without interaction.
///
/// The controller never verifies PINs and never locks on its own: on expiry
/// it asks the session, which refuses unless a PIN is stored.
pub struct AppLockController {
    signals_tx: mpsc::UnboundedSender<ActivitySignal>,
    task: JoinHandle<()>,
}

impl AppLockController {
    pub fn spawn(session: SessionHandle, settings: &CoreSettings) -> Self {
        let (signals_tx, signals_rx) = mpsc::unbounded_channel();
        let timer = InactivityTimer {
            states: session.subscribe(),
            session,
            signals_rx,
            timeout: settings.lock_timeout(),
            lock_on_background: settings.lock_on_background,
            deadline: None,
            armed_for: None,
        };
        let task = tokio::spawn(timer.run());
        Self { signals_tx, task }
    }

    pub fn signal(&self, signal: ActivitySignal) -> Result<()> {
        self.signals_tx
            .send(signal)
            .map_err(|_| NestError::SessionStopped)
    }

    pub fn touch_start(&self) -> Result<()> {
        self.signal(ActivitySignal::TouchStart)
    }

    pub fn touch_move(&self) -> Result<()> {
        self.signal(ActivitySignal::TouchMove)
    }

    pub fn foreground(&self) -> Result<()> {
        self.signal(ActivitySignal::Foreground)
    }

    pub fn background(&self) -> Result<()> {
        self.signal(ActivitySignal::Background)
    }

    pub async fn shutdown(self) {
        drop(self.signals_tx);
        if let Err(e) = self.task.await {
            warn!("Lock controller ended abnormally: {}", e);
        }
    }
}

struct InactivityTimer {
    session: SessionHandle,
    states: watch::Receiver<SessionState>,
    signals_rx: mpsc::UnboundedReceiver<ActivitySignal>,
    timeout: Duration,
    lock_on_background: bool,
    deadline: Option<Instant>,
    /// Identity and lock flag the deadline was last armed for.
    armed_for: Option<(Option<Identity>, bool)>,
}

impl InactivityTimer {
    async fn run(mut self) {
        let initial = self.states.borrow_and_update().clone();
        self.on_state(&initial);

        loop {
            let deadline = self.deadline;
            let expiry = async move {
                match deadline {
                    Some(at) => sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                signal = self.signals_rx.recv() => match signal {
                    Some(signal) => self.on_signal(signal).await,
                    None => break,
                },
                changed = self.states.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let state = self.states.borrow_and_update().clone();
                    self.on_state(&state);
                }
                _ = expiry => self.on_expiry().await,
            }
        }
        debug!("Lock controller stopped");
    }

    fn rearm(&mut self) {
        self.deadline = Some(Instant::now() + self.timeout);
    }

    /// Re-arm when the identity changes or the session gets unlocked; disarm
    /// while signed out or locked.
    fn on_state(&mut self, state: &SessionState) {
        let key = (state.identity.clone(), state.locked);
        if self.armed_for.as_ref() == Some(&key) {
            return;
        }
        self.armed_for = Some(key);

        if state.identity.is_some() && !state.locked {
            self.rearm();
        } else {
            self.deadline = None;
        }
    }

    async fn on_signal(&mut self, signal: ActivitySignal) {
        if signal == ActivitySignal::Background && self.lock_on_background {
            self.lock("app went to background").await;
            return;
        }
        if self.deadline.is_some() {
            self.rearm();
        }
    }

    async fn on_expiry(&mut self) {
        self.lock("inactivity timeout").await;
    }

    async fn lock(&mut self, reason: &str) {
        match self.session.request_lock().await {
            Ok(true) => {
                info!("Locked after {}", reason);
                self.deadline = None;
            }
            // No PIN stored: lock stays off, check again next period.
            Ok(false) => {
                let state = self.states.borrow();
                let active = state.identity.is_some() && !state.locked;
                drop(state);
                if active {
                    self.rearm();
                } else {
                    self.deadline = None;
                }
            }
            Err(e) => {
                debug!("Lock request failed: {}", e);
                self.deadline = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MemoryAuth, MemoryDocumentStore};
    use crate::credentials::{CredentialStore, PinStore};
    use crate::profiles::ProfileRepository;
    use crate::session::SessionStateMachine;
    use std::sync::Arc;
    use tokio::time::sleep;

    struct Fixture {
        _machine: SessionStateMachine,
        session: SessionHandle,
        pins: PinStore,
    }

    async fn signed_in(settings: &CoreSettings) -> Fixture {
        let store = MemoryDocumentStore::new();
        let auth = MemoryAuth::new();
        let credentials = Arc::new(CredentialStore::in_memory());
        let alice = Identity::new("alice0uid");
        ProfileRepository::new(Arc::new(store.clone()))
            .register(&alice, "alice@example.com")
            .await
            .unwrap();

        let mut machine = SessionStateMachine::new(
            Arc::new(auth.clone()),
            Arc::new(store),
            credentials.clone(),
            settings,
        )
        .unwrap();
        let session = machine.start().unwrap();
        auth.sign_in(alice);
        session
            .wait_for(|s| s.identity.is_some() && !s.loading)
            .await
            .unwrap();

        Fixture {
            _machine: machine,
            session,
            pins: PinStore::new(credentials, settings.pin_length),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_inactivity_locks_when_pin_stored() {
        let settings = CoreSettings::default();
        let fx = signed_in(&settings).await;
        fx.pins.set_pin("1234").unwrap();
        let _controller = AppLockController::spawn(fx.session.clone(), &settings);

        sleep(Duration::from_secs(59)).await;
        assert!(!fx.session.state().locked);

        sleep(Duration::from_secs(2)).await;
        assert!(fx.session.state().locked);
    }

    #[tokio::test(start_paused = true)]
    async fn test_without_pin_never_locks() {
        let settings = CoreSettings::default();
        let fx = signed_in(&settings).await;
        let _controller = AppLockController::spawn(fx.session.clone(), &settings);

        sleep(Duration::from_secs(60 * 30)).await;
        assert!(!fx.session.state().locked);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interaction_resets_deadline() {
        let settings = CoreSettings::default();
        let fx = signed_in(&settings).await;
        fx.pins.set_pin("1234").unwrap();
        let controller = AppLockController::spawn(fx.session.clone(), &settings);

        sleep(Duration::from_secs(50)).await;
        controller.touch_start().unwrap();
        sleep(Duration::from_secs(50)).await;
        assert!(!fx.session.state().locked);

        controller.touch_move().unwrap();
        sleep(Duration::from_secs(30)).await;
        controller.foreground().unwrap();
        sleep(Duration::from_secs(59)).await;
        assert!(!fx.session.state().locked);

        sleep(Duration::from_secs(2)).await;
        assert!(fx.session.state().locked);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_only_rearms_by_default() {
        let settings = CoreSettings::default();
        let fx = signed_in(&settings).await;
        fx.pins.set_pin("1234").unwrap();
        let controller = AppLockController::spawn(fx.session.clone(), &settings);

        sleep(Duration::from_secs(30)).await;
        controller.background().unwrap();
        sleep(Duration::from_secs(45)).await;
        assert!(!fx.session.state().locked);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lock_on_background() {
        let settings = CoreSettings {
            lock_on_background: true,
            ..CoreSettings::default()
        };
        let fx = signed_in(&settings).await;
        fx.pins.set_pin("1234").unwrap();
        let controller = AppLockController::spawn(fx.session.clone(), &settings);

        controller.background().unwrap();
        sleep(Duration::from_millis(10)).await;
        assert!(fx.session.state().locked);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_timer() {
        let settings = CoreSettings::default();
        let fx = signed_in(&settings).await;
        fx.pins.set_pin("1234").unwrap();
        let controller = AppLockController::spawn(fx.session.clone(), &settings);

        controller.shutdown().await;
        sleep(Duration::from_secs(120)).await;
        assert!(!fx.session.state().locked);
    }
}
