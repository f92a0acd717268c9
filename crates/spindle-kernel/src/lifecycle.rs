//! [`LifecycleFlag`] – the process-wide cooperative cancellation signal.
//!
//! Built on a [`tokio::sync::watch`] channel so any number of loops can both
//! poll the current state and await the transition out of
//! [`Lifecycle::Running`].  Transitions only move forward; a request to move
//! backwards is ignored.

use std::sync::Arc;

use spindle_types::Lifecycle;
use tokio::sync::watch;
use tracing::info;

/// Shared, cheaply cloneable lifecycle signal.
#[derive(Clone, Debug)]
pub struct LifecycleFlag {
    sender: Arc<watch::Sender<Lifecycle>>,
}

impl LifecycleFlag {
    /// Create a flag in the [`Lifecycle::Running`] state.
    pub fn new() -> Self {
        let (sender, _) = watch::channel(Lifecycle::Running);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn current(&self) -> Lifecycle {
        *self.sender.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.current().is_running()
    }

    /// Move to `next` if it is further along than the current state.
    ///
    /// Returns `true` when the state changed.
    pub fn advance(&self, next: Lifecycle) -> bool {
        let changed = self.sender.send_if_modified(|state| {
            if next > *state {
                *state = next;
                true
            } else {
                false
            }
        });
        if changed {
            info!(state = ?next, "lifecycle transition");
        }
        changed
    }

    /// Ask every loop to wind down.
    pub fn request_stop(&self) -> bool {
        self.advance(Lifecycle::Stopping)
    }

    /// Receiver side for loops that need to await cancellation.
    pub fn subscribe(&self) -> LifecycleWatch {
        LifecycleWatch {
            receiver: self.sender.subscribe(),
        }
    }
}

impl Default for LifecycleFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// Await-able view of a [`LifecycleFlag`].
#[derive(Clone, Debug)]
pub struct LifecycleWatch {
    receiver: watch::Receiver<Lifecycle>,
}

impl LifecycleWatch {
    pub fn is_running(&self) -> bool {
        self.receiver.borrow().is_running()
    }

    /// Resolve once the flag has left [`Lifecycle::Running`].
    ///
    /// Also resolves if every [`LifecycleFlag`] has been dropped.
    pub async fn stopped(&mut self) {
        let _ = self.receiver.wait_for(|state| !state.is_running()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn starts_running() {
        let flag = LifecycleFlag::new();
        assert_eq!(flag.current(), Lifecycle::Running);
        assert!(flag.is_running());
    }

    #[test]
    fn transitions_only_move_forward() {
        let flag = LifecycleFlag::new();
        assert!(flag.request_stop());
        assert!(!flag.request_stop(), "second stop request is a no-op");
        assert!(flag.advance(Lifecycle::Stopped));
        assert!(!flag.advance(Lifecycle::Running));
        assert!(!flag.advance(Lifecycle::Stopping));
        assert_eq!(flag.current(), Lifecycle::Stopped);
    }

    #[test]
    fn running_can_jump_straight_to_stopped() {
        let flag = LifecycleFlag::new();
        assert!(flag.advance(Lifecycle::Stopped));
        assert!(!flag.is_running());
    }

    #[tokio::test]
    async fn watchers_wake_on_stop() {
        let flag = LifecycleFlag::new();
        let mut watch = flag.subscribe();
        let waiter = tokio::spawn(async move {
            watch.stopped().await;
            watch.is_running()
        });

        tokio::task::yield_now().await;
        flag.request_stop();

        let still_running = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("watcher must wake")
            .unwrap();
        assert!(!still_running);
    }

    #[tokio::test]
    async fn watcher_created_after_stop_resolves_immediately() {
        let flag = LifecycleFlag::new();
        flag.request_stop();
        let mut watch = flag.subscribe();
        tokio::time::timeout(Duration::from_millis(100), watch.stopped())
            .await
            .expect("already stopped");
    }

    #[test]
    fn clones_share_state() {
        let flag = LifecycleFlag::new();
        let other = flag.clone();
        other.request_stop();
        assert_eq!(flag.current(), Lifecycle::Stopping);
    }
}
