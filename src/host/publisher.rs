use parking_lot::Mutex;
use std::{sync::Arc, time::Duration};
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, warn};

use crate::protocol::{wire, CurrentState, Topic};
use crate::transport::Transport;

/// Emits rate-limited `current_state` snapshots.
///
/// A change opens a debounce window; when it closes the latest value is
/// published. Changes inside the window collapse into that single message,
/// so the first publish after a quiet period waits at most one window.
pub struct StatePublisher {
    transport: Arc<dyn Transport>,
    debounce: Duration,
    last_published: Mutex<Option<CurrentState>>,
}

impl StatePublisher {
    pub fn new(transport: Arc<dyn Transport>, debounce: Duration) -> Self {
        Self {
            transport,
            debounce,
            last_published: Mutex::new(None),
        }
    }

    /// Publishes immediately, bypassing the debounce and the duplicate check.
    /// Used to answer an explicit `REQUEST_STATE` pull.
    pub fn publish_now(&self, state: CurrentState) -> bool {
        let sent = self.send(state);
        if sent {
            *self.last_published.lock() = Some(state);
        }
        sent
    }

    /// Publishes unless `state` equals the last snapshot that went out.
    pub fn publish_if_changed(&self, state: CurrentState) -> bool {
        if *self.last_published.lock() == Some(state) {
            debug!("State unchanged, skipping publish");
            return false;
        }
        self.publish_now(state)
    }

    pub fn last_published(&self) -> Option<CurrentState> {
        *self.last_published.lock()
    }

    /// Follows `changes` until the sender is dropped.
    pub fn spawn(self: Arc<Self>, mut changes: watch::Receiver<CurrentState>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let initial = *changes.borrow_and_update();
            self.publish_if_changed(initial);

            while changes.changed().await.is_ok() {
                tokio::time::sleep(self.debounce).await;
                let latest = *changes.borrow_and_update();
                self.publish_if_changed(latest);
            }

            debug!("State source closed, publisher stopping");
        })
    }

    fn send(&self, state: CurrentState) -> bool {
        let payload = match wire::encode_state(&state) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("⚠️ Could not encode state: {}", e);
                return false;
            }
        };

        match self.transport.send(Topic::CurrentState, payload) {
            Ok(()) => {
                debug!(
                    "📡 State published: index {}/{} hash {} playing {}",
                    state.current_index, state.queue_size, state.queue_hash, state.is_playing
                );
                true
            }
            Err(e) => {
                warn!("⚠️ State publish dropped: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::transport::{LocalLink, MockTransport};

    fn state(index: usize) -> CurrentState {
        CurrentState::new(11, 20, index, true)
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_collapses_into_last_value() {
        let (host, companion) = LocalLink::pair(4096, 0.0);
        let mut rx = companion.subscribe();
        let (tx, changes) = watch::channel(state(0));

        let publisher = Arc::new(StatePublisher::new(Arc::new(host), Duration::from_millis(300)));
        let handle = publisher.clone().spawn(changes);

        let first = rx.recv().await.unwrap();
        assert_eq!(wire::decode_state(&first.payload).unwrap(), state(0));

        for index in 1..=5 {
            tx.send_replace(state(index));
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let collapsed = rx.recv().await.unwrap();
        assert_eq!(wire::decode_state(&collapsed.payload).unwrap(), state(5));
        assert!(rx.try_recv().is_err());

        drop(tx);
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_change_waits_at_most_one_window() {
        let (host, companion) = LocalLink::pair(4096, 0.0);
        let mut rx = companion.subscribe();
        let (tx, changes) = watch::channel(state(0));
        let publisher = Arc::new(StatePublisher::new(Arc::new(host), Duration::from_millis(300)));
        let _handle = publisher.clone().spawn(changes);
        rx.recv().await.unwrap();

        let started = tokio::time::Instant::now();
        tx.send_replace(state(1));
        let envelope = rx.recv().await.unwrap();

        assert!(started.elapsed() <= Duration::from_millis(300));
        assert_eq!(wire::decode_state(&envelope.payload).unwrap(), state(1));
    }

    #[test]
    fn test_duplicates_are_suppressed_but_pulls_are_not() {
        let mut transport = MockTransport::new();
        transport
            .expect_send()
            .withf(|topic, _| *topic == Topic::CurrentState)
            .times(2)
            .returning(|_, _| Ok(()));
        let publisher = StatePublisher::new(Arc::new(transport), Duration::from_millis(300));

        assert!(publisher.publish_if_changed(state(3)));
        assert!(!publisher.publish_if_changed(state(3)));
        assert!(publisher.publish_now(state(3)));
    }

    #[test]
    fn test_send_failures_are_dropped() {
        let mut transport = MockTransport::new();
        transport
            .expect_send()
            .times(1)
            .returning(|_, _| Err(TransportError::Disconnected));
        let publisher = StatePublisher::new(Arc::new(transport), Duration::from_millis(300));

        assert!(!publisher.publish_if_changed(state(1)));
        assert_eq!(publisher.last_published(), None);
    }
}
