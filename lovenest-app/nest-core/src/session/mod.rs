//! The session state machine: identity × pairing × lock, composed from the
//! auth provider, the profile document and the nest document.

mod driver;
mod machine;
mod state;

pub use machine::{SessionHandle, SessionStateMachine};
pub use state::{SessionPhase, SessionState};
