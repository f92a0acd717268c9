//! `spindle-runtime` – The Controller
//!
//! Wires the hardware, safety and network layers into one running
//! controller.
//!
//! # Modules
//!
//! - [`executor`] – [`MotorExecutor`][executor::MotorExecutor]: the
//!   [`CommandHandler`][spindle_middleware::CommandHandler] that turns
//!   decoded commands into duty-cycle writes, settle delays and position
//!   updates.  It exclusively owns the
//!   [`PositionTracker`][spindle_hal::PositionTracker] and is the only writer
//!   of the published angle.
//! - [`controller`] – [`Controller`][controller::Controller]: the
//!   `Constructing → Running → Stopping → Stopped` coordinator that starts
//!   the command listener and feedback publisher and owns the idempotent
//!   teardown.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: initialises
//!   the global `tracing` subscriber with an optional OTLP span exporter.

pub mod controller;
pub mod executor;
pub mod telemetry;

pub use controller::{Controller, ControllerConfig, ControllerState, Teardown};
pub use executor::MotorExecutor;
pub use telemetry::{TracerProviderGuard, init_tracing};
