//! WebSocket position feedback.
//!
//! [`FeedbackPublisher`] keeps one outbound WebSocket open to the remote
//! observer.  Each session:
//!
//! 1. connects to `ws://host:port`,
//! 2. sends the [`FeedbackAuth`] JSON object once and waits for exactly one
//!    acknowledgement frame,
//! 3. sends the latest committed angle as a decimal-radian text frame every
//!    publish interval.
//!
//! Any failure along the way zeroes the actuator, waits the reconnect
//! backoff, and starts a new session.  The publisher only returns when the
//! lifecycle flag leaves `Running`.
//!
//! The publisher never touches the encoder: it reads the angle from a
//! [`watch`] channel that the command task writes.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use spindle_hal::SharedMotor;
use spindle_kernel::{LifecycleFlag, LifecycleWatch};
use spindle_types::{FeedbackAuth, SpindleError};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

/// Timing knobs for the publisher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedbackSettings {
    /// Interval between angle frames (100 ms ≈ 10 Hz).
    pub publish_interval: Duration,
    /// Wait after a failed session before reconnecting.
    pub reconnect_backoff: Duration,
}

impl Default for FeedbackSettings {
    fn default() -> Self {
        Self {
            publish_interval: Duration::from_millis(100),
            reconnect_backoff: Duration::from_secs(1),
        }
    }
}

/// Long-lived feedback client.
pub struct FeedbackPublisher {
    url: String,
    auth: FeedbackAuth,
    angle: watch::Receiver<f64>,
    motor: SharedMotor,
    lifecycle: LifecycleFlag,
    settings: FeedbackSettings,
}

impl FeedbackPublisher {
    pub fn new(
        url: impl Into<String>,
        auth: FeedbackAuth,
        angle: watch::Receiver<f64>,
        motor: SharedMotor,
        lifecycle: LifecycleFlag,
        settings: FeedbackSettings,
    ) -> Self {
        Self {
            url: url.into(),
            auth,
            angle,
            motor,
            lifecycle,
            settings,
        }
    }

    /// Connect, publish and reconnect until the lifecycle flag leaves
    /// `Running`.
    pub async fn run(self) {
        let mut stop = self.lifecycle.subscribe();

        while self.lifecycle.is_running() {
            let mut session_stop = stop.clone();
            let result = tokio::select! {
                biased;
                _ = stop.stopped() => break,
                result = self.session(&mut session_stop) => result,
            };

            match result {
                Ok(()) => break,
                Err(e) => {
                    warn!(error = %e, url = %self.url, "WebSocket feedback lost, stopping motor");
                    if let Err(e) = self.motor.halt() {
                        error!(error = %e, "failed to zero actuator after feedback loss");
                    }
                    tokio::select! {
                        biased;
                        _ = stop.stopped() => break,
                        _ = tokio::time::sleep(self.settings.reconnect_backoff) => {}
                    }
                }
            }
        }

        info!("WebSocket feedback publisher stopped");
    }

    /// One connect → authenticate → publish cycle.
    ///
    /// Returns `Ok(())` only when the lifecycle flag stopped the loop.
    async fn session(&self, stop: &mut LifecycleWatch) -> Result<(), SpindleError> {
        let (ws, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| SpindleError::Connection(format!("connect to {}: {e}", self.url)))?;
        let (mut ws_tx, mut ws_rx) = ws.split();

        // ── Handshake ───────────────────────────────────────────────────────
        let auth = serde_json::to_string(&self.auth)
            .map_err(|e| SpindleError::Connection(format!("auth serialization: {e}")))?;
        ws_tx
            .send(Message::Text(auth.into()))
            .await
            .map_err(|e| SpindleError::Connection(format!("auth send: {e}")))?;

        let ack = loop {
            match ws_rx.next().await {
                Some(Ok(Message::Text(text))) => break text.as_str().to_string(),
                Some(Ok(Message::Binary(bytes))) => {
                    break String::from_utf8_lossy(&bytes).into_owned();
                }
                Some(Ok(Message::Close(_))) | None => {
                    return Err(SpindleError::Connection(
                        "closed before authentication acknowledgement".to_string(),
                    ));
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(SpindleError::Connection(format!("auth recv: {e}"))),
            }
        };
        info!(response = %ack, "WebSocket authentication");

        // ── Publish loop ────────────────────────────────────────────────────
        let mut ticker = tokio::time::interval(self.settings.publish_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = stop.stopped() => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    return Ok(());
                }
                incoming = ws_rx.next() => match incoming {
                    Some(Ok(Message::Close(_))) | None => {
                        return Err(SpindleError::Connection("closed by peer".to_string()));
                    }
                    Some(Err(e)) => return Err(SpindleError::Connection(format!("recv: {e}"))),
                    Some(Ok(_)) => {}
                },
                _ = ticker.tick() => {
                    let angle = *self.angle.borrow();
                    ws_tx
                        .send(Message::Text(format_angle(angle).into()))
                        .await
                        .map_err(|e| SpindleError::Connection(format!("send: {e}")))?;
                    debug!(angle_deg = angle.to_degrees(), "Sent position feedback");
                }
            }
        }
    }
}

/// Render an angle as the plain decimal-radian text the observer parses.
pub fn format_angle(angle_rad: f64) -> String {
    angle_rad.to_string()
}
