//! UDP command intake.
//!
//! [`CommandListener`] receives one datagram at a time and runs the full
//! per-message protocol before looking at the next one:
//!
//! 1. Parse the payload as a [`CommandToken`] and decrypt it.
//! 2. Parse the plaintext into a [`Command`].
//! 3. Record the acceptance time, then hand the command to the
//!    [`CommandHandler`] and await its completion (including any settle
//!    delay).
//! 4. Run the safety deadline check.
//!
//! Decode and parse failures drop the datagram with one diagnostic; the
//! deadline check still runs against the previous acceptance time.  Commands
//! are therefore strictly serialised: a datagram that arrives during a settle
//! delay waits in the socket buffer.
//!
//! Between datagrams the same task also drives a periodic deadline tick and
//! an idle position sample, so every mutation of position state happens on
//! this one task.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use spindle_kernel::LifecycleFlag;
use spindle_types::{Command, SpindleError};
use tokio::net::UdpSocket;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::cipher::{Cipher, CommandToken};

/// Receive buffer size; larger datagrams are truncated and fail to decode.
const MAX_DATAGRAM_BYTES: usize = 2048;

// ────────────────────────────────────────────────────────────────────────────
// CommandHandler
// ────────────────────────────────────────────────────────────────────────────

/// Carries out decoded commands.  Owned exclusively by the listener task.
#[async_trait]
pub trait CommandHandler: Send {
    /// Execute `command` to completion and return the reply text.
    async fn execute(&mut self, command: Command) -> Result<String, SpindleError>;

    /// Force zero output if `now - last_command` exceeds the safety timeout.
    /// Returns `true` when the deadline was exceeded.
    fn enforce_deadline(&mut self, now: Instant, last_command: Instant) -> bool;

    /// Refresh position state from the encoder while idle.
    fn sample(&mut self);

    /// Period of the background deadline tick.
    fn deadline_period(&self) -> Duration;
}

/// What happened to one datagram.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The command ran; carries the reply text.
    Executed(String),
    /// The command was accepted but failed while executing.
    Failed(SpindleError),
    /// The datagram was not a valid command and was discarded.
    Dropped(SpindleError),
}

// ────────────────────────────────────────────────────────────────────────────
// CommandListener
// ────────────────────────────────────────────────────────────────────────────

/// Datagram intake loop for one command socket.
pub struct CommandListener<H> {
    socket: Arc<UdpSocket>,
    cipher: Arc<dyn Cipher>,
    handler: H,
    lifecycle: LifecycleFlag,
    sample_period: Duration,
    last_command: Instant,
}

impl<H: CommandHandler> CommandListener<H> {
    /// Create a listener on an already bound socket.
    ///
    /// The acceptance clock starts now, so the safety deadline applies from
    /// startup even before the first command arrives.
    pub fn new(
        socket: Arc<UdpSocket>,
        cipher: Arc<dyn Cipher>,
        handler: H,
        lifecycle: LifecycleFlag,
        sample_period: Duration,
    ) -> Self {
        Self {
            socket,
            cipher,
            handler,
            lifecycle,
            sample_period,
            last_command: Instant::now(),
        }
    }

    /// Time the most recent command was accepted.
    pub fn last_command(&self) -> Instant {
        self.last_command
    }

    /// Run until the lifecycle flag leaves `Running`, then hand back the
    /// handler.
    pub async fn run(mut self) -> H {
        let mut stop = self.lifecycle.subscribe();
        let mut deadline_tick = tokio::time::interval(self.handler.deadline_period());
        deadline_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut sample_tick = tokio::time::interval(self.sample_period);
        sample_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut buf = vec![0u8; MAX_DATAGRAM_BYTES];

        if let Ok(addr) = self.socket.local_addr() {
            info!(%addr, "UDP command listener started");
        }

        while self.lifecycle.is_running() {
            tokio::select! {
                biased;
                _ = stop.stopped() => break,
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok((len, peer)) => {
                        let outcome = self.process(&buf[..len]).await;
                        self.reply(&outcome, peer).await;
                    }
                    Err(e) => warn!(error = %e, "UDP receive error"),
                },
                _ = deadline_tick.tick() => {
                    self.handler.enforce_deadline(Instant::now(), self.last_command);
                }
                _ = sample_tick.tick() => self.handler.sample(),
            }
        }

        info!("UDP command listener stopped");
        self.handler
    }

    /// Run the per-message protocol on one datagram payload.
    pub async fn process(&mut self, datagram: &[u8]) -> Outcome {
        let outcome = match self.decode(datagram) {
            Ok(command) => {
                self.last_command = Instant::now();
                info!(?command, "Received UDP command");
                match self.handler.execute(command).await {
                    Ok(reply) => {
                        info!(%reply, "Command executed");
                        Outcome::Executed(reply)
                    }
                    Err(e) => {
                        warn!(error = %e, ?command, "Command failed");
                        Outcome::Failed(e)
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, len = datagram.len(), "Dropping UDP datagram");
                Outcome::Dropped(e)
            }
        };

        self.handler.enforce_deadline(Instant::now(), self.last_command);
        outcome
    }

    fn decode(&self, datagram: &[u8]) -> Result<Command, SpindleError> {
        let token = CommandToken::parse(datagram)?;
        let plaintext = self.cipher.decrypt(&token)?;
        Command::parse(&plaintext)
    }

    /// Best-effort acknowledgement back to the sender.  Dropped datagrams
    /// get no reply.
    async fn reply(&self, outcome: &Outcome, peer: SocketAddr) {
        let text = match outcome {
            Outcome::Executed(reply) => reply.clone(),
            Outcome::Failed(e) => format!("Error: {e}"),
            Outcome::Dropped(_) => return,
        };
        if let Err(e) = self.socket.send_to(text.as_bytes(), peer).await {
            debug!(error = %e, %peer, "failed to send command reply");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::ShiftCipher;
    use std::sync::Mutex;

    /// Records every call so the protocol order can be asserted.
    #[derive(Default)]
    struct RecordingHandler {
        events: Arc<Mutex<Vec<String>>>,
        lifecycle: Option<LifecycleFlag>,
    }

    #[async_trait]
    impl CommandHandler for RecordingHandler {
        async fn execute(&mut self, command: Command) -> Result<String, SpindleError> {
            self.events.lock().unwrap().push(format!("execute {command:?}"));
            match command {
                Command::Stop => {
                    if let Some(flag) = &self.lifecycle {
                        flag.request_stop();
                    }
                    Ok("Motor Stopped".to_string())
                }
                Command::Move(m) if m > 100 => Err(SpindleError::Hardware {
                    component: "test".to_string(),
                    details: "refused".to_string(),
                }),
                _ => Ok("ok".to_string()),
            }
        }

        fn enforce_deadline(&mut self, _now: Instant, _last: Instant) -> bool {
            self.events.lock().unwrap().push("deadline".to_string());
            false
        }

        fn sample(&mut self) {}

        fn deadline_period(&self) -> Duration {
            Duration::from_secs(60)
        }
    }

    const KEY: &[u8] = b"unit";

    async fn listener(handler: RecordingHandler) -> CommandListener<RecordingHandler> {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        CommandListener::new(
            Arc::new(socket),
            Arc::new(ShiftCipher::new(KEY)),
            handler,
            LifecycleFlag::new(),
            Duration::from_secs(60),
        )
    }

    fn wire(plaintext: &str) -> Vec<u8> {
        ShiftCipher::new(KEY).encrypt(plaintext).to_wire().into_bytes()
    }

    #[tokio::test]
    async fn accepted_command_executes_then_checks_deadline() {
        let handler = RecordingHandler::default();
        let events = Arc::clone(&handler.events);
        let mut listener = listener(handler).await;

        let outcome = listener.process(&wire("RESET")).await;
        assert_eq!(outcome, Outcome::Executed("ok".to_string()));
        assert_eq!(*events.lock().unwrap(), vec!["execute Reset", "deadline"]);
    }

    #[tokio::test(start_paused = true)]
    async fn accepted_command_refreshes_timestamp() {
        let mut listener = listener(RecordingHandler::default()).await;
        let before = listener.last_command();
        tokio::time::advance(Duration::from_millis(300)).await;
        listener.process(&wire("25")).await;
        assert_eq!(listener.last_command() - before, Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_payload_is_dropped_and_keeps_stale_timestamp() {
        let handler = RecordingHandler::default();
        let events = Arc::clone(&handler.events);
        let mut listener = listener(handler).await;
        let before = listener.last_command();
        tokio::time::advance(Duration::from_millis(300)).await;

        // Decrypts fine but is neither RESET nor an integer.
        let outcome = listener.process(&wire("abc")).await;
        assert!(matches!(outcome, Outcome::Dropped(SpindleError::Parse(_))));

        // Not a token at all.
        let outcome = listener.process(b"RESET").await;
        assert!(matches!(outcome, Outcome::Dropped(SpindleError::Decode(_))));

        assert_eq!(listener.last_command(), before);
        assert_eq!(*events.lock().unwrap(), vec!["deadline", "deadline"]);
    }

    #[tokio::test]
    async fn out_of_range_code_point_is_dropped() {
        let handler = RecordingHandler::default();
        let events = Arc::clone(&handler.events);
        let mut listener = listener(handler).await;

        let payload = format!("[{}]", i64::MIN);
        let outcome = listener.process(payload.as_bytes()).await;
        assert!(matches!(outcome, Outcome::Dropped(SpindleError::Decode(_))));
        assert_eq!(*events.lock().unwrap(), vec!["deadline"]);

        let outcome = listener.process(&wire("10")).await;
        assert_eq!(outcome, Outcome::Executed("ok".to_string()));
    }

    /// Counts `WARN` events emitted while it is the default subscriber.
    #[derive(Clone, Default)]
    struct WarnCounter(Arc<Mutex<usize>>);

    impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for WarnCounter {
        fn on_event(
            &self,
            event: &tracing::Event<'_>,
            _ctx: tracing_subscriber::layer::Context<'_, S>,
        ) {
            if *event.metadata().level() == tracing::Level::WARN {
                *self.0.lock().unwrap() += 1;
            }
        }
    }

    #[test]
    fn each_dropped_datagram_logs_one_warning() {
        use tracing_subscriber::layer::SubscriberExt;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let mut listener = runtime.block_on(listener(RecordingHandler::default()));

        let counter = WarnCounter::default();
        let subscriber = tracing_subscriber::registry().with(counter.clone());
        tracing::subscriber::with_default(subscriber, || {
            let payloads: [Vec<u8>; 3] = [wire("abc"), b"RESET".to_vec(), b"[1, 2".to_vec()];
            for (sent, payload) in payloads.iter().enumerate() {
                let outcome = runtime.block_on(listener.process(payload));
                assert!(matches!(outcome, Outcome::Dropped(_)));
                assert_eq!(*counter.0.lock().unwrap(), sent + 1);
            }
        });
    }

    #[tokio::test]
    async fn execution_failure_is_contained() {
        let mut listener = listener(RecordingHandler::default()).await;
        let outcome = listener.process(&wire("150")).await;
        assert!(matches!(outcome, Outcome::Failed(SpindleError::Hardware { .. })));
        // The next command still runs.
        let outcome = listener.process(&wire("10")).await;
        assert_eq!(outcome, Outcome::Executed("ok".to_string()));
    }

    #[tokio::test]
    async fn run_exits_on_stop_sentinel_and_replies() {
        let lifecycle = LifecycleFlag::new();
        let handler = RecordingHandler {
            lifecycle: Some(lifecycle.clone()),
            ..Default::default()
        };
        let events = Arc::clone(&handler.events);
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let addr = socket.local_addr().unwrap();
        let listener = CommandListener::new(
            socket,
            Arc::new(ShiftCipher::new(KEY)),
            handler,
            lifecycle.clone(),
            Duration::from_secs(60),
        );
        let task = tokio::spawn(listener.run());

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(&wire("0"), addr).await.unwrap();

        let mut buf = [0u8; 64];
        let (len, _) = tokio::time::timeout(Duration::from_secs(2), client.recv_from(&mut buf))
            .await
            .expect("reply expected")
            .unwrap();
        assert_eq!(&buf[..len], b"Motor Stopped");

        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("listener must exit")
            .unwrap();
        assert!(!lifecycle.is_running());
        assert!(events.lock().unwrap().contains(&"execute Stop".to_string()));
    }

    #[tokio::test]
    async fn run_exits_when_lifecycle_stops_externally() {
        let lifecycle = LifecycleFlag::new();
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let listener = CommandListener::new(
            socket,
            Arc::new(ShiftCipher::new(KEY)),
            RecordingHandler::default(),
            lifecycle.clone(),
            Duration::from_secs(60),
        );
        let task = tokio::spawn(listener.run());
        tokio::task::yield_now().await;
        lifecycle.request_stop();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("listener must exit")
            .unwrap();
    }
}
