//! Generic `MotorDriver` trait for a single encoder-equipped DC motor.
//!
//! A driver wraps one physical device: a quadrature counter input and a
//! signed PWM output.  Calls are synchronous and expected to return quickly;
//! any settle time after a duty-cycle change is inserted by the caller.

use spindle_types::SpindleError;

/// A quadrature encoder plus signed PWM actuator.
pub trait MotorDriver: Send {
    /// Stable identifier used in diagnostics, e.g. `"labjack_t7"`.
    fn id(&self) -> &str;

    /// Route PWM output to `channel`.
    fn configure_pwm(&mut self, channel: &str) -> Result<(), SpindleError>;

    /// Enable quadrature decoding on the encoder input.
    fn configure_quadrature(&mut self) -> Result<(), SpindleError>;

    /// Return the raw encoder count.
    fn read_counter(&mut self) -> Result<i64, SpindleError>;

    /// Load `baseline` into the hardware counter.
    fn reset_counter(&mut self, baseline: i64) -> Result<(), SpindleError>;

    /// Apply a signed duty cycle in percent, `[-100, 100]`.
    ///
    /// # Errors
    ///
    /// Returns [`SpindleError::Hardware`] if the write does not reach the
    /// device.
    fn set_duty_cycle(&mut self, percent: f64) -> Result<(), SpindleError>;

    /// Release the device handle.  Further calls may fail.
    fn close(&mut self) -> Result<(), SpindleError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal in-process driver used only for tests.
    struct MockMotor {
        counter: i64,
        duty: f64,
    }

    impl MotorDriver for MockMotor {
        fn id(&self) -> &str {
            "mock"
        }

        fn configure_pwm(&mut self, _channel: &str) -> Result<(), SpindleError> {
            Ok(())
        }

        fn configure_quadrature(&mut self) -> Result<(), SpindleError> {
            Ok(())
        }

        fn read_counter(&mut self) -> Result<i64, SpindleError> {
            Ok(self.counter)
        }

        fn reset_counter(&mut self, baseline: i64) -> Result<(), SpindleError> {
            self.counter = baseline;
            Ok(())
        }

        fn set_duty_cycle(&mut self, percent: f64) -> Result<(), SpindleError> {
            self.duty = percent;
            Ok(())
        }

        fn close(&mut self) -> Result<(), SpindleError> {
            Ok(())
        }
    }

    #[test]
    fn drivers_are_usable_as_trait_objects() {
        let mut motor: Box<dyn MotorDriver> = Box::new(MockMotor {
            counter: 0,
            duty: 0.0,
        });
        motor.reset_counter(42).unwrap();
        motor.set_duty_cycle(-30.0).unwrap();
        assert_eq!(motor.read_counter().unwrap(), 42);
        assert_eq!(motor.id(), "mock");
    }
}
