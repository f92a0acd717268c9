//! [`SharedMotor`] – the single device handle shared between duties.
//!
//! The command path, the feedback publisher's defensive stop, the watchdog
//! and teardown all need the driver.  The handle serialises access behind a
//! mutex that is only held for the duration of one synchronous driver call,
//! never across an `.await`.
//!
//! Once [`release`][SharedMotor::release] has run the driver is gone: every
//! further call fails with [`SpindleError::Hardware`], except
//! [`halt`][SharedMotor::halt], which becomes a no-op.

use std::sync::{Arc, Mutex, MutexGuard};

use spindle_types::SpindleError;
use tracing::{info, warn};

use crate::motor::MotorDriver;

type Slot = Option<Box<dyn MotorDriver>>;

/// Cloneable, thread-safe owner of a [`MotorDriver`].
#[derive(Clone)]
pub struct SharedMotor {
    slot: Arc<Mutex<Slot>>,
    id: Arc<str>,
}

impl SharedMotor {
    pub fn new(driver: Box<dyn MotorDriver>) -> Self {
        let id = Arc::from(driver.id());
        Self {
            slot: Arc::new(Mutex::new(Some(driver))),
            id,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    // A panic while the lock was held must not keep teardown from zeroing
    // the actuator, so poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run one synchronous operation against the driver.
    ///
    /// # Errors
    ///
    /// Propagates the driver's error, or returns [`SpindleError::Hardware`]
    /// if the handle has already been released.
    pub fn with<R>(
        &self,
        op: impl FnOnce(&mut dyn MotorDriver) -> Result<R, SpindleError>,
    ) -> Result<R, SpindleError> {
        let mut slot = self.lock();
        match slot.as_mut() {
            Some(driver) => op(driver.as_mut()),
            None => Err(SpindleError::Hardware {
                component: self.id.to_string(),
                details: "device handle already released".to_string(),
            }),
        }
    }

    pub fn read_counter(&self) -> Result<i64, SpindleError> {
        self.with(|m| m.read_counter())
    }

    pub fn set_duty_cycle(&self, percent: f64) -> Result<(), SpindleError> {
        self.with(|m| m.set_duty_cycle(percent))
    }

    /// Force zero output.  Succeeds trivially once released.
    pub fn halt(&self) -> Result<(), SpindleError> {
        let mut slot = self.lock();
        match slot.as_mut() {
            Some(driver) => driver.set_duty_cycle(0.0),
            None => Ok(()),
        }
    }

    /// Zero the output, close the device and drop the driver.
    ///
    /// Returns `false` if the handle was already released.  The driver is
    /// dropped even when zeroing or closing fails; those failures are logged.
    pub fn release(&self) -> bool {
        let Some(mut driver) = self.lock().take() else {
            return false;
        };
        if let Err(e) = driver.set_duty_cycle(0.0) {
            warn!(motor = %self.id, error = %e, "failed to zero actuator during release");
        }
        if let Err(e) = driver.close() {
            warn!(motor = %self.id, error = %e, "failed to close device handle");
        }
        info!(motor = %self.id, "device handle released");
        true
    }

    pub fn is_released(&self) -> bool {
        self.lock().is_none()
    }
}

impl std::fmt::Debug for SharedMotor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedMotor")
            .field("id", &self.id)
            .field("released", &self.is_released())
            .finish()
    }
}
