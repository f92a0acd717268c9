//! Loopback tests for the feedback publisher against an in-process
//! WebSocket observer.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use spindle_hal::{SharedMotor, SimMotor};
use spindle_kernel::LifecycleFlag;
use spindle_middleware::{FeedbackPublisher, FeedbackSettings};
use spindle_types::FeedbackAuth;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{accept_async, tungstenite::Message};

const WAIT: Duration = Duration::from_secs(5);

fn auth() -> FeedbackAuth {
    FeedbackAuth {
        name: "bench".to_string(),
        password: "s3cret".to_string(),
    }
}

fn settings() -> FeedbackSettings {
    FeedbackSettings {
        publish_interval: Duration::from_millis(10),
        reconnect_backoff: Duration::from_millis(50),
    }
}

/// Observer that acknowledges auth, forwards the auth frame and the first
/// `frames_per_session` angle frames, then drops the connection.
async fn spawn_observer(frames_per_session: usize) -> (String, mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let Ok(mut ws) = accept_async(stream).await else {
                continue;
            };
            if let Some(Ok(Message::Text(auth))) = ws.next().await {
                let _ = tx.send(format!("auth {}", auth.as_str()));
                let _ = ws.send(Message::Text("Authentication successful".into())).await;
            }
            let mut seen = 0;
            while seen < frames_per_session {
                match ws.next().await {
                    Some(Ok(Message::Text(frame))) => {
                        let _ = tx.send(frame.as_str().to_string());
                        seen += 1;
                    }
                    Some(Ok(_)) => {}
                    _ => break,
                }
            }
            // Dropping `ws` here simulates a link failure.
        }
    });

    (url, rx)
}

async fn next(rx: &mut mpsc::UnboundedReceiver<String>) -> String {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("observer frame expected")
        .expect("observer alive")
}

#[tokio::test]
async fn handshake_then_publishes_latest_angle() {
    let (url, mut frames) = spawn_observer(usize::MAX).await;
    let motor = SharedMotor::new(Box::new(SimMotor::new(0.0)));
    let (angle_tx, angle_rx) = watch::channel(0.25_f64);
    let lifecycle = LifecycleFlag::new();

    let publisher = FeedbackPublisher::new(url, auth(), angle_rx, motor, lifecycle.clone(), settings());
    let task = tokio::spawn(publisher.run());

    assert_eq!(next(&mut frames).await, r#"auth {"name":"bench","password":"s3cret"}"#);
    assert_eq!(next(&mut frames).await.parse::<f64>().unwrap(), 0.25);

    angle_tx.send_replace(-1.0);
    // Frames already in flight may still carry the old value.
    let mut latest = next(&mut frames).await;
    while latest != "-1" {
        latest = next(&mut frames).await;
    }

    lifecycle.request_stop();
    tokio::time::timeout(WAIT, task).await.expect("publisher must stop").unwrap();
}

#[tokio::test]
async fn reconnects_and_rehandshakes_after_disconnect() {
    let (url, mut frames) = spawn_observer(2).await;
    let sim = SimMotor::new(0.0);
    let probe = sim.probe();
    let motor = SharedMotor::new(Box::new(sim));
    motor.set_duty_cycle(40.0).unwrap();

    let (_angle_tx, angle_rx) = watch::channel(1.0_f64);
    let lifecycle = LifecycleFlag::new();
    let publisher = FeedbackPublisher::new(url, auth(), angle_rx, motor, lifecycle.clone(), settings());
    let task = tokio::spawn(publisher.run());

    assert!(next(&mut frames).await.starts_with("auth "));
    assert_eq!(next(&mut frames).await, "1");
    assert_eq!(next(&mut frames).await, "1");

    // The observer dropped the link: the publisher zeroes the actuator and
    // authenticates again on a fresh session.
    assert!(next(&mut frames).await.starts_with("auth "));
    assert_eq!(probe.duty_cycle(), 0.0);
    assert_eq!(next(&mut frames).await, "1");

    lifecycle.request_stop();
    tokio::time::timeout(WAIT, task).await.expect("publisher must stop").unwrap();
}

#[tokio::test]
async fn unreachable_observer_keeps_retrying_until_stopped() {
    // Reserve a port, then close it so connects are refused.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    drop(listener);

    let sim = SimMotor::new(0.0);
    let probe = sim.probe();
    let motor = SharedMotor::new(Box::new(sim));
    motor.set_duty_cycle(55.0).unwrap();

    let (_angle_tx, angle_rx) = watch::channel(0.0_f64);
    let lifecycle = LifecycleFlag::new();
    let publisher = FeedbackPublisher::new(url, auth(), angle_rx, motor, lifecycle.clone(), settings());
    let task = tokio::spawn(publisher.run());

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!task.is_finished(), "connection errors must not end the publisher");
    assert_eq!(probe.duty_cycle(), 0.0);

    lifecycle.request_stop();
    tokio::time::timeout(WAIT, task).await.expect("publisher must stop").unwrap();
}
