mod code;
mod service;

pub use code::PairingCode;
pub use service::{PairingCodeService, ProfileRef};
