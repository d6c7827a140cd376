//! Periodic status broadcasting to a subscriber
//!
//! One poll task per broadcaster, started by the first `listen` and torn
//! down by `cancel` or by dropping the broadcaster. On each tick the
//! task queries the controller for a fresh snapshot and pushes it to the
//! subscriber. Snapshots are best-effort point-in-time reads: a slow
//! backend query delays the next tick rather than overlapping it.

use crate::controller::TunnelController;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};
use wgctl_proto::TunnelSnapshot;

/// Default cadence of status snapshots.
pub const POLL_PERIOD: Duration = Duration::from_secs(1);

/// Pushes periodic [`TunnelSnapshot`]s from one controller to at most
/// one subscriber.
///
/// Attaching while a task is already running replaces the subscriber
/// without starting a second task; the single-timer invariant holds for
/// the broadcaster's whole life.
pub struct TelemetryBroadcaster {
    controller: Arc<TunnelController>,
    period: Duration,
    sink: Arc<Mutex<Option<mpsc::Sender<TunnelSnapshot>>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl TelemetryBroadcaster {
    pub fn new(controller: Arc<TunnelController>) -> Self {
        Self::with_period(controller, POLL_PERIOD)
    }

    pub fn with_period(controller: Arc<TunnelController>, period: Duration) -> Self {
        Self {
            controller,
            period,
            sink: Arc::new(Mutex::new(None)),
            task: Mutex::new(None),
        }
    }

    /// Attaches `sink` as the sole subscriber and ensures the poll task
    /// is running. An existing subscriber is replaced, with a warning;
    /// an existing task keeps running rather than doubling up.
    pub fn listen(&self, sink: mpsc::Sender<TunnelSnapshot>) {
        {
            let mut slot = self.sink.lock().unwrap();
            if slot.is_some() {
                warn!(tunnel = %self.controller.name(), "replacing active telemetry subscriber");
            }
            *slot = Some(sink);
        }

        let mut task = self.task.lock().unwrap();
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }

        let controller = Arc::clone(&self.controller);
        let sink_slot = Arc::clone(&self.sink);
        let period = self.period;
        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;

                let sender = { sink_slot.lock().unwrap().clone() };
                let Some(sender) = sender else {
                    // Cancelled between ticks.
                    break;
                };

                let snapshot = controller.status().await;
                if sender.send(snapshot).await.is_err() {
                    debug!(
                        tunnel = %controller.name(),
                        "telemetry subscriber went away, stopping poll task"
                    );
                    sink_slot.lock().unwrap().take();
                    break;
                }
            }
        }));
    }

    /// Detaches the subscriber and stops the poll task. Cancelling with
    /// nothing attached is a no-op.
    pub fn cancel(&self) {
        self.sink.lock().unwrap().take();
        if let Some(task) = self.task.lock().unwrap().take() {
            task.abort();
        }
    }

    /// Whether a poll task is currently live.
    pub fn is_polling(&self) -> bool {
        self.task
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }
}

// A poll task must never outlive its broadcaster: it would keep querying
// a controller whose identity slot may be reused.
impl Drop for TelemetryBroadcaster {
    fn drop(&mut self) {
        if let Some(task) = self.task.lock().unwrap().take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockTunnelBackend;
    use crate::provision::ConfigProvisioner;
    use async_trait::async_trait;
    use wgctl_proto::{PeerStats, TunnelName, TunnelState};
    use wgctl_telemetry::TelemetryReader;

    struct FixedReader(PeerStats);

    #[async_trait]
    impl TelemetryReader for FixedReader {
        async fn read(&self, _name: &TunnelName) -> PeerStats {
            self.0
        }
    }

    fn broadcaster() -> (TelemetryBroadcaster, tempfile::TempDir) {
        let mut backend = MockTunnelBackend::new();
        backend.expect_is_up().returning(|_| true);

        let dir = tempfile::tempdir().unwrap();
        let controller = Arc::new(TunnelController::new(
            TunnelName::new("wg0").unwrap(),
            ConfigProvisioner::new(dir.path()),
            Arc::new(backend),
            Arc::new(FixedReader(PeerStats {
                rx_bytes: 1,
                tx_bytes: 2,
                last_handshake_millis: 3,
            })),
        ));
        (TelemetryBroadcaster::new(controller), dir)
    }

    #[tokio::test(start_paused = true)]
    async fn test_listen_delivers_snapshot_per_tick() {
        let (broadcaster, _dir) = broadcaster();
        let (tx, mut rx) = mpsc::channel(16);
        broadcaster.listen(tx);

        let snapshot = rx.recv().await.unwrap();
        assert_eq!(snapshot.state, TunnelState::Up);
        assert_eq!(snapshot.rx_bytes, 1);
        assert_eq!(snapshot.tx_bytes, 2);

        // Subsequent ticks keep delivering.
        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_listen_replaces_subscriber_without_second_task() {
        let (broadcaster, _dir) = broadcaster();
        let (tx1, mut rx1) = mpsc::channel(16);
        broadcaster.listen(tx1);
        assert!(rx1.recv().await.is_some());
        assert!(broadcaster.is_polling());

        let (tx2, mut rx2) = mpsc::channel(16);
        broadcaster.listen(tx2);
        assert!(broadcaster.is_polling());

        // The replacement sink receives; the old one is closed out.
        assert!(rx2.recv().await.is_some());
        assert!(rx1.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_polling_and_is_idempotent() {
        let (broadcaster, _dir) = broadcaster();

        // Cancel with nothing attached: no-op.
        broadcaster.cancel();
        assert!(!broadcaster.is_polling());

        let (tx, mut rx) = mpsc::channel(16);
        broadcaster.listen(tx);
        assert!(rx.recv().await.is_some());

        broadcaster.cancel();
        assert!(!broadcaster.is_polling());
        assert!(rx.recv().await.is_none());

        broadcaster.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_receiver_shuts_the_task_down() {
        let (broadcaster, _dir) = broadcaster();
        let (tx, rx) = mpsc::channel(16);
        broadcaster.listen(tx);
        drop(rx);

        // Give the task a tick to notice the closed channel.
        tokio::time::sleep(POLL_PERIOD * 3).await;
        assert!(!broadcaster.is_polling());
    }

    #[tokio::test(start_paused = true)]
    async fn test_listen_after_cancel_restarts_polling() {
        let (broadcaster, _dir) = broadcaster();
        let (tx, mut rx) = mpsc::channel(16);
        broadcaster.listen(tx);
        assert!(rx.recv().await.is_some());
        broadcaster.cancel();

        let (tx2, mut rx2) = mpsc::channel(16);
        broadcaster.listen(tx2);
        assert!(rx2.recv().await.is_some());
    }
}
