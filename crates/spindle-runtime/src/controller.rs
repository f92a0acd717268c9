//! [`Controller`] – owns the motor, the command socket and the lifecycle.
//!
//! # Lifecycle
//!
//! ```text
//! Constructing ──new()──▶ Running ──stop request──▶ Stopping ──teardown──▶ Stopped
//! ```
//!
//! [`Controller::new`] configures the hardware, captures the encoder baseline
//! and binds the command socket.  [`Controller::run`] starts the command
//! listener and feedback publisher and waits until either a stop is
//! requested (stop sentinel, Ctrl-C, or [`LifecycleFlag::request_stop`]) or
//! one of the loops exits on its own.  It then waits for both loops and runs
//! [`Controller::shutdown`].
//!
//! Teardown zeroes the duty cycle, closes the command socket and releases
//! the device handle.  It runs at most once; later calls report the same
//! final state and do nothing else.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use spindle_hal::{MotorDriver, PositionTracker, SharedMotor};
use spindle_kernel::{LifecycleFlag, SafetyWatchdog};
use spindle_middleware::{Cipher, CommandListener, FeedbackPublisher, FeedbackSettings};
use spindle_types::{
    AnglePolicy, DEFAULT_PULSES_PER_REVOLUTION, FeedbackAuth, Lifecycle, MAX_DUTY_PERCENT,
    SpindleError,
};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tracing::{error, info, warn};

use crate::executor::MotorExecutor;

/// How long [`Controller::run`] waits for each loop after a stop request
/// before aborting it.
const STOP_GRACE: Duration = Duration::from_secs(2);

// ────────────────────────────────────────────────────────────────────────────
// ControllerConfig
// ────────────────────────────────────────────────────────────────────────────

/// Everything the controller needs besides the driver and cipher.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Local address the command socket binds to.
    pub bind_address: IpAddr,
    pub command_port: u16,
    /// `ws://host:port` of the feedback observer.
    pub feedback_url: String,
    pub feedback_auth: FeedbackAuth,
    pub feedback: FeedbackSettings,
    /// PWM output channel handed to [`MotorDriver::configure_pwm`].
    pub pwm_channel: String,
    pub pulses_per_revolution: u32,
    pub angle_policy: AnglePolicy,
    /// Maximum silence between commands before the duty cycle is forced to
    /// zero.
    pub command_timeout: Duration,
    pub settle_delay: Duration,
    pub duty_clamp: f64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            command_port: 8766,
            feedback_url: "ws://10.250.25.253:8765".to_string(),
            feedback_auth: FeedbackAuth {
                name: "motor_controller".to_string(),
                password: String::new(),
            },
            feedback: FeedbackSettings::default(),
            pwm_channel: "DAC".to_string(),
            pulses_per_revolution: DEFAULT_PULSES_PER_REVOLUTION,
            angle_policy: AnglePolicy::default(),
            command_timeout: Duration::from_secs(1),
            settle_delay: Duration::from_millis(100),
            duty_clamp: MAX_DUTY_PERCENT,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// State reporting
// ────────────────────────────────────────────────────────────────────────────

/// Coordinator state, including the pre-run construction phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Constructing,
    Running,
    Stopping,
    Stopped,
}

impl From<Lifecycle> for ControllerState {
    fn from(lifecycle: Lifecycle) -> Self {
        match lifecycle {
            Lifecycle::Running => Self::Running,
            Lifecycle::Stopping => Self::Stopping,
            Lifecycle::Stopped => Self::Stopped,
        }
    }
}

/// Resource state after [`Controller::shutdown`].
///
/// `socket_closed` holds once no task has the command socket any more.  A
/// shutdown issued while [`Controller::run`] is still joining the listener
/// reports it open; the report `run` returns reflects the joined state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Teardown {
    pub state: ControllerState,
    pub socket_closed: bool,
    pub handle_released: bool,
}

// ────────────────────────────────────────────────────────────────────────────
// Controller
// ────────────────────────────────────────────────────────────────────────────

/// Pieces that move into the background tasks on the first `run`.
struct Pending {
    executor: MotorExecutor,
    angle: watch::Receiver<f64>,
}

pub struct Controller {
    config: ControllerConfig,
    motor: SharedMotor,
    cipher: Arc<dyn Cipher>,
    lifecycle: LifecycleFlag,
    socket: Mutex<Option<Arc<UdpSocket>>>,
    /// Observes the socket without keeping it open.
    socket_ref: Weak<UdpSocket>,
    command_addr: SocketAddr,
    pending: Mutex<Option<Pending>>,
    torn_down: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Controller {
    /// Configure the hardware, capture the position baseline and bind the
    /// command socket.
    ///
    /// # Errors
    ///
    /// Returns [`SpindleError::Setup`] if any step fails.  The device handle
    /// is released before returning, so a failed construction leaves the
    /// motor at zero output.
    pub async fn new(
        config: ControllerConfig,
        driver: Box<dyn MotorDriver>,
        cipher: Arc<dyn Cipher>,
    ) -> Result<Self, SpindleError> {
        let motor = SharedMotor::new(driver);
        info!(motor = %motor.id(), channel = %config.pwm_channel, "configuring motor");

        let baseline = match motor.with(|m| {
            m.configure_pwm(&config.pwm_channel)?;
            m.configure_quadrature()?;
            m.read_counter()
        }) {
            Ok(baseline) => baseline,
            Err(e) => {
                motor.release();
                return Err(SpindleError::Setup(format!("hardware initialisation: {e}")));
            }
        };

        let bind = SocketAddr::new(config.bind_address, config.command_port);
        let bound = UdpSocket::bind(bind)
            .await
            .and_then(|socket| socket.local_addr().map(|addr| (socket, addr)));
        let (socket, command_addr) = match bound {
            Ok(bound) => bound,
            Err(e) => {
                motor.release();
                return Err(SpindleError::Setup(format!("bind UDP {bind}: {e}")));
            }
        };

        let lifecycle = LifecycleFlag::new();
        let tracker = PositionTracker::new(config.pulses_per_revolution, baseline, config.angle_policy);
        let (executor, angle) = MotorExecutor::new(
            motor.clone(),
            tracker,
            SafetyWatchdog::new(config.command_timeout),
            lifecycle.clone(),
            config.settle_delay,
            config.duty_clamp,
        );

        info!(baseline, %command_addr, policy = ?config.angle_policy, "controller constructed");

        let socket = Arc::new(socket);
        Ok(Self {
            config,
            motor,
            cipher,
            lifecycle,
            socket_ref: Arc::downgrade(&socket),
            socket: Mutex::new(Some(socket)),
            command_addr,
            pending: Mutex::new(Some(Pending { executor, angle })),
            torn_down: AtomicBool::new(false),
        })
    }

    /// The shared stop signal.  Call `request_stop` on it to begin an
    /// orderly shutdown from outside (e.g. a signal handler).
    pub fn lifecycle(&self) -> &LifecycleFlag {
        &self.lifecycle
    }

    /// Address the command socket is bound to.
    pub fn command_addr(&self) -> SocketAddr {
        self.command_addr
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn state(&self) -> ControllerState {
        if lock(&self.pending).is_some() && self.lifecycle.is_running() {
            ControllerState::Constructing
        } else {
            self.lifecycle.current().into()
        }
    }

    /// Run both loops until stopped, then tear down.
    ///
    /// # Errors
    ///
    /// Returns [`SpindleError::Setup`] if the controller was already run or
    /// torn down.
    pub async fn run(&self) -> Result<Teardown, SpindleError> {
        let Pending { executor, angle } = lock(&self.pending)
            .take()
            .ok_or_else(|| SpindleError::Setup("controller has already been started".to_string()))?;
        let socket = lock(&self.socket)
            .clone()
            .ok_or_else(|| SpindleError::Setup("command socket already closed".to_string()))?;

        let listener = CommandListener::new(
            socket,
            Arc::clone(&self.cipher),
            executor,
            self.lifecycle.clone(),
            self.config.feedback.publish_interval,
        );
        let publisher = FeedbackPublisher::new(
            self.config.feedback_url.clone(),
            self.config.feedback_auth.clone(),
            angle,
            self.motor.clone(),
            self.lifecycle.clone(),
            self.config.feedback,
        );

        let mut listener_task = tokio::spawn(listener.run());
        let mut publisher_task = tokio::spawn(publisher.run());
        info!(
            command_addr = %self.command_addr,
            feedback_url = %self.config.feedback_url,
            "controller running"
        );

        let mut listener_done = false;
        let mut publisher_done = false;
        let mut stop = self.lifecycle.subscribe();
        tokio::select! {
            _ = stop.stopped() => {}
            res = &mut listener_task => {
                listener_done = true;
                report_exit("command listener", res);
            }
            res = &mut publisher_task => {
                publisher_done = true;
                report_exit("feedback publisher", res);
            }
        }
        self.lifecycle.request_stop();

        if !listener_done {
            join_within_grace("command listener", listener_task).await;
        }
        if !publisher_done {
            join_within_grace("feedback publisher", publisher_task).await;
        }

        Ok(self.shutdown())
    }

    /// Zero the duty cycle, close the command socket and release the device
    /// handle.  Safe to call any number of times, before or after `run`.
    pub fn shutdown(&self) -> Teardown {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return self.teardown_state();
        }

        self.lifecycle.request_stop();
        if let Err(e) = self.motor.halt() {
            error!(error = %e, "failed to zero actuator during teardown");
        }
        if lock(&self.socket).take().is_some() {
            info!(addr = %self.command_addr, "command socket closed");
        }
        // Unstarted loops hold no resources; drop them with the rest.
        lock(&self.pending).take();
        self.motor.release();
        self.lifecycle.advance(Lifecycle::Stopped);

        let teardown = self.teardown_state();
        info!(?teardown, "controller stopped");
        teardown
    }

    fn teardown_state(&self) -> Teardown {
        Teardown {
            state: self.state(),
            socket_closed: self.socket_ref.strong_count() == 0,
            handle_released: self.motor.is_released(),
        }
    }
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("command_addr", &self.command_addr)
            .field("motor", &self.motor)
            .field("state", &self.state())
            .finish()
    }
}

fn report_exit<T>(task: &str, result: Result<T, JoinError>) {
    match result {
        Ok(_) => warn!(task, "loop exited before a stop request"),
        Err(e) => error!(task, error = %e, "loop terminated abnormally"),
    }
}

async fn join_within_grace<T>(task: &str, mut handle: JoinHandle<T>) {
    match tokio::time::timeout(STOP_GRACE, &mut handle).await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => error!(task, error = %e, "loop terminated abnormally"),
        Err(_) => {
            warn!(task, grace = ?STOP_GRACE, "loop did not stop in time, aborting");
            handle.abort();
            // Resolves once the aborted future, and whatever it holds, is dropped.
            let _ = handle.await;
        }
    }
}
