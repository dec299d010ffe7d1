use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

use super::state::SessionState;
use crate::backend::{AuthProvider, DocumentPath, DocumentSnapshot, DocumentStore, Subscription};
use crate::credentials::PinStore;
use crate::model::{Identity, Nest, NestId, Profile};

/// Everything the driver reacts to: upstream deliveries and requests from
/// session handles, in one queue.
#[derive(Debug)]
pub(crate) enum SessionEvent {
    IdentityChanged(Option<Identity>),
    ProfileSnapshot {
        epoch: u64,
        snapshot: DocumentSnapshot,
    },
    NestSnapshot {
        epoch: u64,
        nest_id: NestId,
        snapshot: DocumentSnapshot,
    },
    /// Result of the PIN presence check started at sign-in.
    PinResolved {
        epoch: u64,
        enabled: bool,
    },
    RequestLock {
        reply: oneshot::Sender<bool>,
    },
    LockChecked {
        epoch: u64,
        enabled: bool,
        reply: oneshot::Sender<bool>,
    },
    /// PIN already verified by the handle.
    Unlock {
        identity: Identity,
        reply: oneshot::Sender<bool>,
    },
    LockDisabled,
    Stop,
}

/// Owns the upstream subscriptions and the composed state. Only this task
/// mutates session state.
pub(crate) struct SessionDriver {
    auth: Arc<dyn AuthProvider>,
    store: Arc<dyn DocumentStore>,
    pins: PinStore,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: mpsc::UnboundedReceiver<SessionEvent>,
    state_tx: watch::Sender<SessionState>,

    identity: Option<Identity>,
    profile: Option<Profile>,
    nest: Option<Nest>,
    /// Nest currently subscribed to. Set once per identity.
    nest_ref: Option<NestId>,
    locked: bool,

    identity_resolved: bool,
    profile_resolved: bool,
    nest_resolved: bool,
    pin_resolved: bool,

    // Dropped in declaration order: nest, profile, identity.
    nest_sub: Option<Subscription>,
    profile_sub: Option<Subscription>,
    identity_sub: Option<Subscription>,
    profile_epoch: u64,
    nest_epoch: u64,
    /// Bumped per identity; PIN checks from an older identity are ignored.
    pin_epoch: u64,
}

impl SessionDriver {
    pub(crate) fn new(
        auth: Arc<dyn AuthProvider>,
        store: Arc<dyn DocumentStore>,
        pins: PinStore,
        events_tx: mpsc::UnboundedSender<SessionEvent>,
        events_rx: mpsc::UnboundedReceiver<SessionEvent>,
        state_tx: watch::Sender<SessionState>,
    ) -> Self {
        Self {
            auth,
            store,
            pins,
            events_tx,
            events_rx,
            state_tx,
            identity: None,
            profile: None,
            nest: None,
            nest_ref: None,
            locked: false,
            identity_resolved: false,
            profile_resolved: false,
            nest_resolved: false,
            pin_resolved: false,
            nest_sub: None,
            profile_sub: None,
            identity_sub: None,
            profile_epoch: 0,
            nest_epoch: 0,
            pin_epoch: 0,
        }
    }

    pub(crate) async fn run(mut self) {
        let tx = self.events_tx.clone();
        self.identity_sub = Some(self.auth.subscribe(Box::new(move |identity| {
            let _ = tx.send(SessionEvent::IdentityChanged(identity));
        })));
        debug!("Session driver started");

        while let Some(event) = self.events_rx.recv().await {
            match event {
                SessionEvent::Stop => break,
                event => self.handle_event(event),
            }
        }

        self.teardown();
        self.identity_sub = None;
        info!("Session driver stopped");
    }

    fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::IdentityChanged(identity) => self.on_identity(identity),
            SessionEvent::ProfileSnapshot { epoch, snapshot } => {
                if epoch != self.profile_epoch {
                    debug!("Dropping stale profile snapshot (epoch {})", epoch);
                    return;
                }
                self.on_profile(snapshot);
            }
            SessionEvent::NestSnapshot {
                epoch,
                nest_id,
                snapshot,
            } => {
                if epoch != self.nest_epoch {
                    debug!("Dropping stale snapshot of nest {} (epoch {})", nest_id, epoch);
                    return;
                }
                self.on_nest(nest_id, snapshot);
            }
            SessionEvent::PinResolved { epoch, enabled } => {
                if epoch != self.pin_epoch {
                    debug!("Dropping stale PIN check (epoch {})", epoch);
                    return;
                }
                self.pin_resolved = true;
                // Sign-in starts locked; only a missing PIN opens it.
                if !enabled {
                    self.locked = false;
                }
            }
            SessionEvent::RequestLock { reply } => self.request_lock(reply),
            SessionEvent::LockChecked {
                epoch,
                enabled,
                reply,
            } => {
                if epoch == self.pin_epoch && enabled && self.identity.is_some() && !self.locked {
                    self.locked = true;
                    info!("Session locked");
                }
                let _ = reply.send(self.identity.is_some() && self.locked);
            }
            SessionEvent::Unlock { identity, reply } => {
                let unlocked = self.identity.as_ref() == Some(&identity);
                if unlocked {
                    self.locked = false;
                    info!("Session unlocked");
                } else {
                    debug!("Ignoring unlock for a session that is no longer current");
                }
                let _ = reply.send(unlocked);
            }
            SessionEvent::LockDisabled => {
                self.locked = false;
            }
            SessionEvent::Stop => {}
        }
        self.publish();
    }

    fn on_identity(&mut self, identity: Option<Identity>) {
        if self.identity_resolved && identity == self.identity {
            return;
        }

        self.teardown();
        self.identity_resolved = true;
        self.identity = identity;

        let Some(identity) = self.identity.clone() else {
            self.locked = false;
            info!("Signed out");
            return;
        };

        info!("Signed in as {}", identity);
        self.locked = true;
        self.check_pin(|epoch, enabled| SessionEvent::PinResolved { epoch, enabled });
        self.subscribe_profile(&identity);
    }

    fn on_profile(&mut self, snapshot: DocumentSnapshot) {
        self.profile_resolved = true;
        let Some(identity) = self.identity.clone() else {
            return;
        };

        let doc = match snapshot {
            Ok(Some(doc)) => doc,
            Ok(None) => {
                debug!("Profile of {} does not exist yet", identity);
                return;
            }
            Err(e) => {
                warn!("Profile subscription error, keeping last known profile: {}", e);
                return;
            }
        };

        let mut profile = match Profile::from_document(identity.clone(), &doc) {
            Ok(profile) => profile,
            Err(e) => {
                warn!("Ignoring malformed profile of {}: {}", identity, e);
                return;
            }
        };

        match self.nest_ref.clone() {
            None => {
                if let Some(nest_id) = profile.nest_id.clone() {
                    self.subscribe_nest(nest_id);
                }
            }
            Some(current) if profile.nest_id.as_ref() != Some(&current) => {
                warn!(
                    "Profile of {} changed its nest reference from {} to {:?}; keeping {}",
                    identity, current, profile.nest_id, current
                );
                profile.nest_id = Some(current);
            }
            Some(_) => {}
        }

        self.profile = Some(profile);
    }

    fn on_nest(&mut self, nest_id: NestId, snapshot: DocumentSnapshot) {
        self.nest_resolved = true;

        let doc = match snapshot {
            Ok(Some(doc)) => doc,
            Ok(None) => {
                warn!("Nest {} is referenced but missing", nest_id);
                return;
            }
            Err(e) => {
                warn!("Nest subscription error, keeping last known nest: {}", e);
                return;
            }
        };

        let nest = match Nest::from_document(nest_id, &doc) {
            Ok(nest) => nest,
            Err(e) => {
                error!("Rejecting malformed nest: {}", e);
                return;
            }
        };

        match &self.identity {
            Some(identity) if nest.has_member(identity) => self.nest = Some(nest),
            Some(identity) => warn!("Nest {} does not list {} as a member", nest.id, identity),
            None => {}
        }
    }

    fn subscribe_profile(&mut self, identity: &Identity) {
        self.profile_epoch += 1;
        let epoch = self.profile_epoch;
        let tx = self.events_tx.clone();

        let result = self.store.subscribe_document(
            &DocumentPath::profile(identity),
            Box::new(move |snapshot| {
                let _ = tx.send(SessionEvent::ProfileSnapshot { epoch, snapshot });
            }),
        );
        match result {
            Ok(subscription) => self.profile_sub = Some(subscription),
            Err(e) => {
                warn!("Could not subscribe to profile of {}: {}", identity, e);
                self.profile_resolved = true;
            }
        }
    }

    fn subscribe_nest(&mut self, nest_id: NestId) {
        // Never two nest listeners at once.
        self.nest_sub = None;
        self.nest_epoch += 1;
        self.nest_resolved = false;
        self.nest_ref = Some(nest_id.clone());

        let epoch = self.nest_epoch;
        let tx = self.events_tx.clone();
        let path = DocumentPath::nest(&nest_id);
        let result = self.store.subscribe_document(
            &path,
            Box::new(move |snapshot| {
                let _ = tx.send(SessionEvent::NestSnapshot {
                    epoch,
                    nest_id: nest_id.clone(),
                    snapshot,
                });
            }),
        );
        match result {
            Ok(subscription) => {
                debug!("Subscribed to {}", path);
                self.nest_sub = Some(subscription);
            }
            Err(e) => {
                warn!("Could not subscribe to {}: {}", path, e);
                self.nest_resolved = true;
            }
        }
    }

    /// Release the profile and nest listeners and forget everything derived
    /// from them. Bumping the epochs drops deliveries already queued.
    fn teardown(&mut self) {
        self.nest_sub = None;
        self.profile_sub = None;
        self.nest_epoch += 1;
        self.profile_epoch += 1;

        self.profile = None;
        self.nest = None;
        self.nest_ref = None;
        self.profile_resolved = false;
        self.nest_resolved = false;
        self.pin_epoch += 1;
        self.pin_resolved = false;
    }

    /// Read PIN presence on the blocking pool (the keyring backend may do
    /// D-Bus or Keychain IO) and feed the answer back into the queue.
    fn check_pin<F>(&self, event: F)
    where
        F: FnOnce(u64, bool) -> SessionEvent + Send + 'static,
    {
        let epoch = self.pin_epoch;
        let pins = self.pins.clone();
        let tx = self.events_tx.clone();
        tokio::task::spawn_blocking(move || {
            let enabled = pins.has_pin().unwrap_or_else(|e| {
                warn!("Could not read app lock state: {}", e);
                false
            });
            let _ = tx.send(event(epoch, enabled));
        });
    }

    fn request_lock(&mut self, reply: oneshot::Sender<bool>) {
        if self.identity.is_none() {
            let _ = reply.send(false);
            return;
        }
        if self.locked {
            let _ = reply.send(true);
            return;
        }
        self.check_pin(move |epoch, enabled| SessionEvent::LockChecked {
            epoch,
            enabled,
            reply,
        });
    }

    fn loading(&self) -> bool {
        if !self.identity_resolved {
            return true;
        }
        if self.identity.is_none() {
            return false;
        }
        !self.pin_resolved
            || !self.profile_resolved
            || (self.nest_ref.is_some() && !self.nest_resolved)
    }

    fn publish(&self) {
        let next = SessionState {
            identity: self.identity.clone(),
            profile: self.profile.clone(),
            nest: self.nest.clone(),
            locked: self.locked,
            loading: self.loading(),
        };
        self.state_tx.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }
}
