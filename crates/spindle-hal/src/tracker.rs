//! [`PositionTracker`] – encoder counts to shaft angle.
//!
//! The tracker owns the encoder baseline and the current angle.  It performs
//! no I/O: callers read the hardware counter and hand the raw value in.
//!
//! # Example
//!
//! ```rust
//! use spindle_hal::tracker::PositionTracker;
//! use spindle_types::AnglePolicy;
//!
//! let mut tracker = PositionTracker::new(2480, 1_000, AnglePolicy::Absolute);
//! let angle = tracker.update(1_000 + 620);
//! assert!((angle - std::f64::consts::FRAC_PI_2).abs() < 1e-12);
//!
//! tracker.reset(5_000);
//! assert_eq!(tracker.update(5_000), 0.0);
//! ```

use std::f64::consts::TAU;

use spindle_types::AnglePolicy;

/// Converts raw encoder counts into radians relative to a baseline.
#[derive(Debug, Clone)]
pub struct PositionTracker {
    baseline: i64,
    angle: f64,
    radians_per_count: f64,
    policy: AnglePolicy,
}

impl PositionTracker {
    /// Create a tracker whose zero angle sits at `baseline`.
    ///
    /// `pulses_per_revolution` must be non-zero; configuration validation
    /// rejects zero before a tracker is ever built.
    pub fn new(pulses_per_revolution: u32, baseline: i64, policy: AnglePolicy) -> Self {
        Self {
            baseline,
            angle: 0.0,
            radians_per_count: TAU / f64::from(pulses_per_revolution.max(1)),
            policy,
        }
    }

    /// The most recently committed angle in radians.
    pub fn current_angle(&self) -> f64 {
        self.angle
    }

    /// The encoder count treated as zero angle.
    pub fn baseline(&self) -> i64 {
        self.baseline
    }

    /// Convert a count difference into radians.
    pub fn counts_to_radians(&self, delta: i64) -> f64 {
        delta as f64 * self.radians_per_count
    }

    /// Recompute the angle from the baseline and `raw_count`, store it, and
    /// return it.
    pub fn update(&mut self, raw_count: i64) -> f64 {
        self.angle = self.counts_to_radians(raw_count - self.baseline);
        self.angle
    }

    /// Replace the baseline with `raw_count` and zero the angle.
    pub fn reset(&mut self, raw_count: i64) {
        self.baseline = raw_count;
        self.angle = 0.0;
    }

    /// Commit the result of one move whose counter read `before` when the
    /// duty cycle was applied and `after` once the settle delay elapsed.
    ///
    /// Under [`AnglePolicy::Accumulated`] only the delta across the move is
    /// added, so motion between moves is not observed.
    pub fn record_move(&mut self, before: i64, after: i64) -> f64 {
        match self.policy {
            AnglePolicy::Absolute => self.update(after),
            AnglePolicy::Accumulated => {
                self.angle += self.counts_to_radians(after - before);
                self.angle
            }
        }
    }

    /// Fold an idle sample of the counter into the angle.
    ///
    /// Absolute tracking follows the encoder; accumulated tracking only moves
    /// on [`record_move`][Self::record_move] and ignores the sample.
    pub fn observe(&mut self, raw_count: i64) -> f64 {
        match self.policy {
            AnglePolicy::Absolute => self.update(raw_count),
            AnglePolicy::Accumulated => self.angle,
        }
    }
}
