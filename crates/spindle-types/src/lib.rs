//! `spindle-types` – shared vocabulary for the Spindle motor controller.
//!
//! Every other crate in the workspace speaks in terms of the types defined
//! here: the [`Lifecycle`] signal that gates every concurrent loop, the
//! decoded remote [`Command`], the [`FeedbackAuth`] handshake payload, and
//! the [`SpindleError`] taxonomy.

use serde::{Deserialize, Serialize};
use std::num::IntErrorKind;
use thiserror::Error;

/// Encoder pulses per full output-shaft revolution (8 counts × 310:1 gearbox).
pub const DEFAULT_PULSES_PER_REVOLUTION: u32 = 2480;

/// Magnitude limit of the signed duty cycle accepted by the actuator.
pub const MAX_DUTY_PERCENT: f64 = 100.0;

/// Literal token that resets the position baseline.
pub const RESET_TOKEN: &str = "RESET";

/// Process-wide run state polled by every concurrent duty.
///
/// Transitions only move forward: `Running → Stopping → Stopped`.  The
/// derived ordering follows declaration order, so `a < b` means `b` is
/// further along the shutdown path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lifecycle {
    Running,
    Stopping,
    Stopped,
}

impl Lifecycle {
    /// `true` while loops should keep doing work.
    pub fn is_running(self) -> bool {
        self == Lifecycle::Running
    }
}

/// How the position tracker in `spindle-hal` derives the current angle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnglePolicy {
    /// Recompute `(raw − baseline) × 2π / ppr` on every read.
    #[default]
    Absolute,
    /// Sum the per-move deltas.  Subject to drift between moves.
    Accumulated,
}

/// A decoded, validated instruction received on the command channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Re-capture the encoder baseline and zero the angle.
    Reset,
    /// Drive the motor at the given signed duty-cycle magnitude (unclamped).
    Move(i64),
    /// The zero-magnitude sentinel: halt the motor and terminate the controller.
    Stop,
}

impl Command {
    /// Parse a decrypted command string.
    ///
    /// Accepts the literal `RESET` or a base-10 signed integer.  Surrounding
    /// whitespace and a single pair of double quotes (a JSON string literal,
    /// as produced by browser clients) are ignored.  Integers beyond the
    /// `i64` range saturate; the executor clamps them to the duty limit
    /// anyway.
    ///
    /// # Errors
    ///
    /// Returns [`SpindleError::Parse`] for anything else.
    pub fn parse(text: &str) -> Result<Self, SpindleError> {
        let trimmed = text.trim();
        let body = trimmed
            .strip_prefix('"')
            .and_then(|s| s.strip_suffix('"'))
            .unwrap_or(trimmed);

        if body == RESET_TOKEN {
            return Ok(Command::Reset);
        }
        match body.parse::<i64>() {
            Ok(0) => Ok(Command::Stop),
            Ok(magnitude) => Ok(Command::Move(magnitude)),
            Err(e) if *e.kind() == IntErrorKind::PosOverflow => Ok(Command::Move(i64::MAX)),
            Err(e) if *e.kind() == IntErrorKind::NegOverflow => Ok(Command::Move(i64::MIN)),
            Err(e) => Err(SpindleError::Parse(format!("{body:?} is not RESET or an integer: {e}"))),
        }
    }
}

/// Authentication payload sent once when the feedback connection opens.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackAuth {
    pub name: String,
    pub password: String,
}

impl std::fmt::Debug for FeedbackAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedbackAuth")
            .field("name", &self.name)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Error taxonomy for the controller.
///
/// `Decode`, `Parse`, `Connection` and `Hardware` are contained by the loop
/// that produced them.  `Setup` and `Config` abort startup.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SpindleError {
    #[error("Decode Error: {0}")]
    Decode(String),

    #[error("Parse Error: {0}")]
    Parse(String),

    #[error("Connection Error: {0}")]
    Connection(String),

    #[error("Hardware Fault on {component}: {details}")]
    Hardware { component: String, details: String },

    #[error("Setup Error: {0}")]
    Setup(String),

    #[error("Config Error: {0}")]
    Config(String),
}

impl SpindleError {
    /// `true` for errors that must abort the process.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SpindleError::Setup(_) | SpindleError::Config(_))
    }
}
