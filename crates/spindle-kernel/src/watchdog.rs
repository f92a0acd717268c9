//! [`SafetyWatchdog`] – command-recency enforcement.
//!
//! The command listener records the time of every accepted command.  Call
//! [`SafetyWatchdog::check`] after each processed datagram and from a
//! periodic tick; when the last accepted command is older than the timeout
//! the actuator is forced to zero output.
//!
//! The watchdog never returns an error.  A failed zero write is logged and
//! naturally retried by the next check, since the deadline is still
//! exceeded.

use std::time::Duration;

use spindle_hal::MotorDriver;
use tokio::time::Instant;
use tracing::{debug, error, warn};

// ────────────────────────────────────────────────────────────────────────────
// SafetyWatchdog
// ────────────────────────────────────────────────────────────────────────────

/// Forces zero output when commands stop arriving.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use spindle_kernel::watchdog::SafetyWatchdog;
/// use tokio::time::Instant;
///
/// let last = Instant::now();
/// let timeout = Duration::from_secs(1);
/// assert!(!SafetyWatchdog::expired(last + Duration::from_millis(999), last, timeout));
/// assert!(SafetyWatchdog::expired(last + Duration::from_millis(1001), last, timeout));
/// ```
#[derive(Debug)]
pub struct SafetyWatchdog {
    timeout: Duration,
    /// `true` once a zero write for the current expiry has succeeded.
    tripped: bool,
}

impl SafetyWatchdog {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            tripped: false,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Period for the background tick: half the timeout.
    pub fn tick_period(&self) -> Duration {
        (self.timeout / 2).max(Duration::from_millis(1))
    }

    /// `true` when strictly more than `timeout` has elapsed since
    /// `last_command`.
    pub fn expired(now: Instant, last_command: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(last_command) > timeout
    }

    /// Enforce the deadline against `motor`.
    ///
    /// Returns `true` when the deadline is exceeded, in which case a zero
    /// duty cycle has been written (or attempted).
    pub fn check(&mut self, now: Instant, last_command: Instant, motor: &mut dyn MotorDriver) -> bool {
        if !Self::expired(now, last_command, self.timeout) {
            self.tripped = false;
            return false;
        }

        match motor.set_duty_cycle(0.0) {
            Ok(()) if !self.tripped => {
                self.tripped = true;
                warn!(
                    timeout_ms = self.timeout.as_millis() as u64,
                    motor = motor.id(),
                    "Safety timeout: motor stopped"
                );
            }
            Ok(()) => debug!("safety timeout still active"),
            Err(e) => {
                self.tripped = false;
                error!(error = %e, "Safety timeout: failed to zero actuator, will retry");
            }
        }
        true
    }

    /// Whether the last check forced the actuator to zero.
    pub fn is_tripped(&self) -> bool {
        self.tripped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spindle_hal::SimMotor;

    const TIMEOUT: Duration = Duration::from_secs(1);

    #[test]
    fn expiry_is_strictly_greater_than_timeout() {
        let last = Instant::now();
        assert!(!SafetyWatchdog::expired(last, last, TIMEOUT));
        assert!(!SafetyWatchdog::expired(last + TIMEOUT, last, TIMEOUT));
        assert!(SafetyWatchdog::expired(last + TIMEOUT + Duration::from_nanos(1), last, TIMEOUT));
    }

    #[test]
    fn command_just_inside_window_prevents_force() {
        let mut motor = SimMotor::new(0.0);
        let probe = motor.probe();
        motor.set_duty_cycle(60.0).unwrap();

        let mut wd = SafetyWatchdog::new(TIMEOUT);
        let last = Instant::now();
        let now = last + TIMEOUT - Duration::from_millis(1);
        assert!(!wd.check(now, last, &mut motor));
        assert_eq!(probe.duty_cycle(), 60.0);
        assert!(!wd.is_tripped());
    }

    #[test]
    fn stale_command_forces_zero() {
        let mut motor = SimMotor::new(0.0);
        let probe = motor.probe();
        motor.set_duty_cycle(-45.0).unwrap();

        let mut wd = SafetyWatchdog::new(TIMEOUT);
        let last = Instant::now();
        assert!(wd.check(last + Duration::from_millis(1500), last, &mut motor));
        assert_eq!(probe.duty_cycle(), 0.0);
        assert!(wd.is_tripped());
    }

    #[test]
    fn failed_zero_write_is_retried_on_next_check() {
        let mut motor = SimMotor::new(0.0);
        let probe = motor.probe();
        motor.set_duty_cycle(80.0).unwrap();
        probe.fail_writes(true);

        let mut wd = SafetyWatchdog::new(TIMEOUT);
        let last = Instant::now();
        let late = last + Duration::from_secs(2);
        assert!(wd.check(late, last, &mut motor));
        assert_eq!(probe.duty_cycle(), 80.0);
        assert!(!wd.is_tripped());

        probe.fail_writes(false);
        assert!(wd.check(late, last, &mut motor));
        assert_eq!(probe.duty_cycle(), 0.0);
        assert!(wd.is_tripped());
    }

    #[test]
    fn fresh_command_clears_trip() {
        let mut motor = SimMotor::new(0.0);
        let mut wd = SafetyWatchdog::new(TIMEOUT);
        let last = Instant::now();
        wd.check(last + Duration::from_secs(5), last, &mut motor);
        assert!(wd.is_tripped());

        let fresh = last + Duration::from_secs(5);
        assert!(!wd.check(fresh, fresh, &mut motor));
        assert!(!wd.is_tripped());
    }

    #[test]
    fn tick_period_is_half_the_timeout() {
        let wd = SafetyWatchdog::new(TIMEOUT);
        assert_eq!(wd.tick_period(), Duration::from_millis(500));
        assert_eq!(wd.timeout(), TIMEOUT);
    }
}
