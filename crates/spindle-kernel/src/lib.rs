//! `spindle-kernel` – Safety & Lifecycle
//!
//! Enforces the rules that keep the actuator safe regardless of what the
//! network does.
//!
//! # Modules
//!
//! - [`watchdog`] – [`SafetyWatchdog`][watchdog::SafetyWatchdog]: forces the
//!   duty cycle to zero when no valid command has arrived within the timeout.
//! - [`lifecycle`] – [`LifecycleFlag`][lifecycle::LifecycleFlag]: the
//!   forward-only `Running → Stopping → Stopped` signal every loop observes.

pub mod lifecycle;
pub mod watchdog;

pub use lifecycle::{LifecycleFlag, LifecycleWatch};
pub use watchdog::SafetyWatchdog;
