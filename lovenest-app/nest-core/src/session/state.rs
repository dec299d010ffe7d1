use serde::Serialize;

use crate::model::{Identity, Nest, NestId, Profile};

/// Coarse position of the session, ignoring the lock flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionPhase {
    Unauthenticated,
    AuthenticatedUnpaired,
    AuthenticatedPaired,
}

/// Composed, read-only view of the current session.
///
/// Published as a whole on every change, so `nest` always belongs to
/// `identity`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionState {
    pub identity: Option<Identity>,
    pub profile: Option<Profile>,
    pub nest: Option<Nest>,
    pub locked: bool,
    pub loading: bool,
}

impl SessionState {
    /// State before the auth provider has reported anything.
    pub fn bootstrapping() -> Self {
        Self {
            identity: None,
            profile: None,
            nest: None,
            locked: false,
            loading: true,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        match (&self.identity, self.nest_id()) {
            (None, _) => SessionPhase::Unauthenticated,
            (Some(_), None) => SessionPhase::AuthenticatedUnpaired,
            (Some(_), Some(_)) => SessionPhase::AuthenticatedPaired,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.identity.is_some()
    }

    /// The nest this session belongs to, from the profile reference even
    /// while the nest document itself is still loading.
    pub fn nest_id(&self) -> Option<&NestId> {
        self.profile
            .as_ref()
            .and_then(|p| p.nest_id.as_ref())
            .or_else(|| self.nest.as_ref().map(|n| &n.id))
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::bootstrapping()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(uid: &str, nest: Option<&str>) -> Profile {
        Profile {
            identity: Identity::new(uid),
            email: None,
            pairing_code: None,
            nest_id: nest.map(NestId::new),
            public_key: None,
            created_at: None,
        }
    }

    #[test]
    fn test_phase_follows_identity_and_nest_reference() {
        let mut state = SessionState::bootstrapping();
        assert_eq!(state.phase(), SessionPhase::Unauthenticated);

        state.identity = Some(Identity::new("a"));
        state.profile = Some(profile("a", None));
        assert_eq!(state.phase(), SessionPhase::AuthenticatedUnpaired);

        state.profile = Some(profile("a", Some("nest_1")));
        assert_eq!(state.phase(), SessionPhase::AuthenticatedPaired);
        assert_eq!(state.nest_id(), Some(&NestId::new("nest_1")));
    }
}
