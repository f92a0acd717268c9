//! In-process motor simulation for CI and bench runs without hardware.
//!
//! [`SimMotor`] integrates encoder counts from the applied duty cycle over
//! elapsed time: at ±100 % the counter moves by `counts_per_second` per
//! second.  The clock is [`tokio::time::Instant`], so tests that pause the
//! Tokio clock get fully deterministic encoder readings.
//!
//! A cloned [`SimProbe`] observes and steers the same state after the motor
//! has been boxed and handed to the controller.
//!
//! # Example
//!
//! ```rust
//! use spindle_hal::{MotorDriver, SimMotor};
//!
//! let motor = SimMotor::new(2480.0);
//! let probe = motor.probe();
//! let mut driver: Box<dyn MotorDriver> = Box::new(motor);
//!
//! driver.set_duty_cycle(40.0).unwrap();
//! assert_eq!(probe.duty_cycle(), 40.0);
//! probe.set_counter(1234);
//! assert_eq!(driver.read_counter().unwrap(), 1234);
//! ```

use std::sync::{Arc, Mutex, MutexGuard};

use spindle_types::{MAX_DUTY_PERCENT, SpindleError};
use tokio::time::Instant;
use tracing::debug;

use crate::motor::MotorDriver;

const SIM_ID: &str = "sim_motor";

#[derive(Debug)]
struct SimState {
    counter: f64,
    duty: f64,
    last_integrated: Instant,
    counts_per_second: f64,
    duty_history: Vec<f64>,
    pwm_channel: Option<String>,
    quadrature: bool,
    closed: bool,
    fail_writes: bool,
}

impl SimState {
    fn integrate(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_integrated).as_secs_f64();
        self.counter += self.duty / MAX_DUTY_PERCENT * self.counts_per_second * elapsed;
        self.last_integrated = now;
    }

    fn ensure_open(&self) -> Result<(), SpindleError> {
        if self.closed {
            return Err(fault("device handle is closed"));
        }
        Ok(())
    }
}

fn fault(details: &str) -> SpindleError {
    SpindleError::Hardware {
        component: SIM_ID.to_string(),
        details: details.to_string(),
    }
}

fn lock(state: &Mutex<SimState>) -> MutexGuard<'_, SimState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ────────────────────────────────────────────────────────────────────────────
// SimMotor
// ────────────────────────────────────────────────────────────────────────────

/// A simulated DC motor with a quadrature encoder.
pub struct SimMotor {
    state: Arc<Mutex<SimState>>,
}

impl SimMotor {
    /// Create a stopped motor whose encoder advances `counts_per_second` at
    /// full duty.
    pub fn new(counts_per_second: f64) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                counter: 0.0,
                duty: 0.0,
                last_integrated: Instant::now(),
                counts_per_second,
                duty_history: Vec::new(),
                pwm_channel: None,
                quadrature: false,
                closed: false,
                fail_writes: false,
            })),
        }
    }

    /// Return a probe sharing this motor's state.
    pub fn probe(&self) -> SimProbe {
        SimProbe {
            state: Arc::clone(&self.state),
        }
    }
}

impl MotorDriver for SimMotor {
    fn id(&self) -> &str {
        SIM_ID
    }

    fn configure_pwm(&mut self, channel: &str) -> Result<(), SpindleError> {
        let mut state = lock(&self.state);
        state.ensure_open()?;
        state.pwm_channel = Some(channel.to_string());
        Ok(())
    }

    fn configure_quadrature(&mut self) -> Result<(), SpindleError> {
        let mut state = lock(&self.state);
        state.ensure_open()?;
        state.quadrature = true;
        Ok(())
    }

    fn read_counter(&mut self) -> Result<i64, SpindleError> {
        let mut state = lock(&self.state);
        state.ensure_open()?;
        state.integrate();
        Ok(state.counter.floor() as i64)
    }

    fn reset_counter(&mut self, baseline: i64) -> Result<(), SpindleError> {
        let mut state = lock(&self.state);
        state.ensure_open()?;
        state.integrate();
        state.counter = baseline as f64;
        Ok(())
    }

    fn set_duty_cycle(&mut self, percent: f64) -> Result<(), SpindleError> {
        let mut state = lock(&self.state);
        state.ensure_open()?;
        if state.fail_writes {
            return Err(fault("injected duty-cycle write failure"));
        }
        if !percent.is_finite() || percent.abs() > MAX_DUTY_PERCENT {
            return Err(fault(&format!("duty cycle {percent} outside [-100, 100]")));
        }
        state.integrate();
        state.duty = percent;
        state.duty_history.push(percent);
        debug!(duty = percent, "sim duty cycle applied");
        Ok(())
    }

    fn close(&mut self) -> Result<(), SpindleError> {
        let mut state = lock(&self.state);
        state.integrate();
        state.closed = true;
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// SimProbe
// ────────────────────────────────────────────────────────────────────────────

/// Test-side handle onto a [`SimMotor`]'s state.
#[derive(Clone)]
pub struct SimProbe {
    state: Arc<Mutex<SimState>>,
}

impl SimProbe {
    /// Currently applied duty cycle.
    pub fn duty_cycle(&self) -> f64 {
        lock(&self.state).duty
    }

    /// Every successfully applied duty cycle, oldest first.
    pub fn duty_history(&self) -> Vec<f64> {
        lock(&self.state).duty_history.clone()
    }

    /// Raw counter as the driver would report it now.
    pub fn counter(&self) -> i64 {
        let mut state = lock(&self.state);
        state.integrate();
        state.counter.floor() as i64
    }

    /// Force the encoder counter to `count`.
    pub fn set_counter(&self, count: i64) {
        let mut state = lock(&self.state);
        state.integrate();
        state.counter = count as f64;
    }

    /// Make every following duty-cycle write fail until cleared.
    pub fn fail_writes(&self, fail: bool) {
        lock(&self.state).fail_writes = fail;
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }

    /// `true` once both PWM output and quadrature input are configured.
    pub fn is_configured(&self) -> bool {
        let state = lock(&self.state);
        state.pwm_channel.is_some() && state.quadrature
    }
}
