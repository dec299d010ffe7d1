mod controller;

pub use controller::{ActivitySignal, AppLockController};
