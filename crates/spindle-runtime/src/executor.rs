//! [`MotorExecutor`] – carries out decoded commands against the motor.
//!
//! The executor is moved into the command listener task and never shared, so
//! the position tracker has exactly one writer.  Everyone else observes the
//! angle through the [`watch::Receiver`] returned by [`MotorExecutor::new`].
//!
//! A move runs as: read the counter, apply the clamped duty cycle, hold for
//! the settle delay (an awaited timer, cut short by shutdown), read the
//! counter again and commit the new angle.  The duty cycle stays applied
//! after the move; the safety watchdog zeroes it if no further command
//! arrives in time.

use std::time::Duration;

use async_trait::async_trait;
use spindle_hal::{PositionTracker, SharedMotor};
use spindle_kernel::{LifecycleFlag, SafetyWatchdog};
use spindle_middleware::CommandHandler;
use spindle_middleware::feedback::format_angle;
use spindle_types::{Command, MAX_DUTY_PERCENT, SpindleError};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info};

pub const RESET_REPLY: &str = "Position Reset";
pub const STOP_REPLY: &str = "Motor Stopped";

/// Executes commands for a single motor.
pub struct MotorExecutor {
    motor: SharedMotor,
    tracker: PositionTracker,
    angle: watch::Sender<f64>,
    watchdog: SafetyWatchdog,
    lifecycle: LifecycleFlag,
    settle_delay: Duration,
    duty_clamp: f64,
}

impl MotorExecutor {
    /// Build an executor and the read side of its angle channel.
    ///
    /// `duty_clamp` bounds the magnitude of applied duty cycles and is itself
    /// capped at 100 %.
    pub fn new(
        motor: SharedMotor,
        tracker: PositionTracker,
        watchdog: SafetyWatchdog,
        lifecycle: LifecycleFlag,
        settle_delay: Duration,
        duty_clamp: f64,
    ) -> (Self, watch::Receiver<f64>) {
        let (angle, angle_rx) = watch::channel(tracker.current_angle());
        let executor = Self {
            motor,
            tracker,
            angle,
            watchdog,
            lifecycle,
            settle_delay,
            duty_clamp: duty_clamp.abs().min(MAX_DUTY_PERCENT),
        };
        (executor, angle_rx)
    }

    pub fn tracker(&self) -> &PositionTracker {
        &self.tracker
    }

    /// Signed duty cycle actually applied for a command `magnitude`.
    pub fn clamp_duty(&self, magnitude: i64) -> f64 {
        (magnitude as f64).clamp(-self.duty_clamp, self.duty_clamp)
    }

    fn commit(&mut self, angle: f64) {
        self.angle.send_replace(angle);
    }

    fn reset(&mut self) -> Result<String, SpindleError> {
        let raw = self.motor.read_counter()?;
        self.motor.with(|m| m.reset_counter(raw))?;
        self.tracker.reset(raw);
        self.commit(0.0);
        info!(baseline = raw, "position baseline reset");
        Ok(RESET_REPLY.to_string())
    }

    fn stop(&mut self) -> Result<String, SpindleError> {
        let halted = self.motor.halt();
        info!("Motor stopped, shutting down controller");
        self.lifecycle.request_stop();
        halted.map(|()| STOP_REPLY.to_string())
    }

    async fn run_move(&mut self, magnitude: i64) -> Result<String, SpindleError> {
        let duty = self.clamp_duty(magnitude);
        let before = self.motor.read_counter()?;
        self.motor.set_duty_cycle(duty)?;

        let mut stop = self.lifecycle.subscribe();
        tokio::select! {
            biased;
            _ = stop.stopped() => debug!("settle delay cut short by shutdown"),
            _ = tokio::time::sleep(self.settle_delay) => {}
        }

        let after = self.motor.read_counter()?;
        let angle = self.tracker.record_move(before, after);
        self.commit(angle);
        debug!(duty, before, after, angle_rad = angle, "move committed");
        Ok(format_angle(angle))
    }
}

#[async_trait]
impl CommandHandler for MotorExecutor {
    async fn execute(&mut self, command: Command) -> Result<String, SpindleError> {
        let result = match command {
            Command::Reset => self.reset(),
            Command::Stop => return self.stop(),
            Command::Move(magnitude) => self.run_move(magnitude).await,
        };
        if result.is_err()
            && let Err(e) = self.motor.halt()
        {
            error!(error = %e, "failed to zero actuator after command failure");
        }
        result
    }

    fn enforce_deadline(&mut self, now: Instant, last_command: Instant) -> bool {
        let watchdog = &mut self.watchdog;
        self.motor
            .with(|m| Ok(watchdog.check(now, last_command, m)))
            .unwrap_or(false)
    }

    fn sample(&mut self) {
        match self.motor.read_counter() {
            Ok(raw) => {
                let angle = self.tracker.observe(raw);
                self.commit(angle);
            }
            Err(e) => debug!(error = %e, "idle position sample failed"),
        }
    }

    fn deadline_period(&self) -> Duration {
        self.watchdog.tick_period()
    }
}
