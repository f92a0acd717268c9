//! `spindle-hal` – Hardware Abstraction Layer
//!
//! # Modules
//!
//! - [`motor`] – [`MotorDriver`][motor::MotorDriver]: the contract every
//!   encoder + PWM device driver implements.  The rest of the controller only
//!   talks to the trait.
//! - [`tracker`] – [`PositionTracker`][tracker::PositionTracker]: converts
//!   raw encoder counts into a radian angle relative to a stored baseline.
//! - [`shared`] – [`SharedMotor`][shared::SharedMotor]: the mutex-guarded
//!   device handle shared by the command path, the watchdog, the feedback
//!   publisher and teardown.
//! - [`sim`] – [`SimMotor`][sim::SimMotor]: an in-process motor + encoder
//!   model for running the full controller without hardware.

pub mod motor;
pub mod shared;
pub mod sim;
pub mod tracker;

pub use motor::MotorDriver;
pub use shared::SharedMotor;
pub use sim::{SimMotor, SimProbe};
pub use tracker::PositionTracker;
