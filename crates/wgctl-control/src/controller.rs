//! Tunnel lifecycle state machine

use crate::backend::TunnelBackend;
use crate::error::ControlError;
use crate::provision::ConfigProvisioner;
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use wgctl_proto::{TunnelName, TunnelSnapshot, TunnelState};
use wgctl_telemetry::TelemetryReader;

/// Lifecycle states of a controller.
///
/// Distinct from [`TunnelState`]: `Down` means a backend is bound but
/// passing no traffic, `Stopped` means no backend is bound at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Stopped,
    Starting,
    Up,
    Down,
    Stopping,
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ControllerState::Stopped => "stopped",
            ControllerState::Starting => "starting",
            ControllerState::Up => "up",
            ControllerState::Down => "down",
            ControllerState::Stopping => "stopping",
        };
        f.write_str(label)
    }
}

/// Drives one named tunnel through its start/stop/status lifecycle.
///
/// The identity is fixed at construction; addressing a different tunnel
/// means a different controller (see [`crate::ControllerRegistry`]).
/// Mutating operations are serialized per controller, so a stop can
/// never race a start that is still probing readiness. Status is a pure
/// query against the live backend and is never blocked by either.
pub struct TunnelController {
    name: TunnelName,
    provisioner: ConfigProvisioner,
    backend: Arc<dyn TunnelBackend>,
    reader: Arc<dyn TelemetryReader>,
    /// Held across backend calls by `start`/`stop`.
    op: tokio::sync::Mutex<()>,
    state: Mutex<ControllerState>,
}

impl TunnelController {
    pub fn new(
        name: TunnelName,
        provisioner: ConfigProvisioner,
        backend: Arc<dyn TunnelBackend>,
        reader: Arc<dyn TelemetryReader>,
    ) -> Self {
        Self {
            name,
            provisioner,
            backend,
            reader,
            op: tokio::sync::Mutex::new(()),
            state: Mutex::new(ControllerState::Stopped),
        }
    }

    pub fn name(&self) -> &TunnelName {
        &self.name
    }

    /// Current lifecycle state. Informational: snapshot state is always
    /// re-derived from the backend, not from this.
    pub fn lifecycle(&self) -> ControllerState {
        *self.state.lock().unwrap()
    }

    fn set_state(&self, next: ControllerState) {
        let mut state = self.state.lock().unwrap();
        debug!(tunnel = %self.name, from = %state, to = %next, "state transition");
        *state = next;
    }

    /// Provisions the config and brings the tunnel up.
    pub async fn start(&self, config: &str) -> Result<(), ControlError> {
        let _op = self.op.lock().await;
        self.set_state(ControllerState::Starting);

        let config_path = match self.provisioner.write(&self.name, config).await {
            Ok(path) => path,
            Err(err) => {
                self.set_state(ControllerState::Stopped);
                return Err(ControlError::ConfigWrite(err));
            }
        };

        let diagnostic = match self.backend.start(&self.name, &config_path).await {
            Ok(diagnostic) => diagnostic,
            Err(err) => {
                self.set_state(ControllerState::Stopped);
                return Err(ControlError::Start {
                    diagnostic: err.to_string(),
                });
            }
        };

        // The backend launched; confirm it actually came up.
        if self.backend.is_up(&self.name).await {
            self.set_state(ControllerState::Up);
            info!(tunnel = %self.name, "tunnel up");
            Ok(())
        } else {
            self.set_state(ControllerState::Down);
            warn!(tunnel = %self.name, "backend launched but tunnel never came up");
            Err(ControlError::Start { diagnostic })
        }
    }

    /// Tears the tunnel down. Stopping an already-stopped controller is
    /// a no-op.
    pub async fn stop(&self) -> Result<(), ControlError> {
        let _op = self.op.lock().await;
        if self.lifecycle() == ControllerState::Stopped {
            debug!(tunnel = %self.name, "stop on stopped controller, nothing to do");
            return Ok(());
        }
        self.set_state(ControllerState::Stopping);

        match self.backend.stop(&self.name).await {
            Ok(()) => {
                self.set_state(ControllerState::Stopped);
                info!(tunnel = %self.name, "tunnel stopped");
                Ok(())
            }
            Err(err) => {
                self.set_state(ControllerState::Down);
                Err(ControlError::Stop(err.to_string()))
            }
        }
    }

    /// One fresh status snapshot.
    ///
    /// State is re-derived from the live backend on every call, never
    /// cached: the backend can die externally between polls. Counters
    /// come from the telemetry reader, which degrades to zeros rather
    /// than failing, so this query itself never fails.
    pub async fn status(&self) -> TunnelSnapshot {
        let state = if self.backend.is_up(&self.name).await {
            TunnelState::Up
        } else {
            TunnelState::Down
        };
        let stats = self.reader.read(&self.name).await;
        TunnelSnapshot::new(self.name.clone(), state, stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockTunnelBackend;
    use async_trait::async_trait;
    use mockall::predicate::always;
    use wgctl_proto::PeerStats;

    /// Reader returning fixed counters.
    struct FixedReader(PeerStats);

    #[async_trait]
    impl TelemetryReader for FixedReader {
        async fn read(&self, _name: &TunnelName) -> PeerStats {
            self.0
        }
    }

    fn name() -> TunnelName {
        TunnelName::new("wg0").unwrap()
    }

    fn controller(
        backend: MockTunnelBackend,
        stats: PeerStats,
    ) -> (TunnelController, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let controller = TunnelController::new(
            name(),
            ConfigProvisioner::new(dir.path()),
            Arc::new(backend),
            Arc::new(FixedReader(stats)),
        );
        (controller, dir)
    }

    #[tokio::test]
    async fn test_start_then_status_reports_up() {
        let mut backend = MockTunnelBackend::new();
        backend
            .expect_start()
            .with(always(), always())
            .times(1)
            .returning(|_, _| Ok(String::new()));
        backend.expect_is_up().returning(|_| true);

        let stats = PeerStats {
            rx_bytes: 512,
            tx_bytes: 1024,
            last_handshake_millis: 1_700_000_000_000,
        };
        let (controller, _dir) = controller(backend, stats);

        controller.start("[Interface]\n").await.unwrap();
        assert_eq!(controller.lifecycle(), ControllerState::Up);

        let snapshot = controller.status().await;
        assert_eq!(snapshot.state, TunnelState::Up);
        assert_eq!(snapshot.rx_bytes, 512);
        assert_eq!(snapshot.tx_bytes, 1024);
        assert_eq!(snapshot.last_handshake_millis, 1_700_000_000_000);
    }

    #[tokio::test]
    async fn test_start_failure_carries_backend_diagnostic() {
        let mut backend = MockTunnelBackend::new();
        backend.expect_start().returning(|_, _| {
            Err(crate::backend::BackendError::Failed(
                "resolvconf: command not found".to_string(),
            ))
        });

        let (controller, _dir) = controller(backend, PeerStats::default());
        let err = controller.start("[Interface]\n").await.unwrap_err();
        assert!(matches!(err, ControlError::Start { ref diagnostic }
            if diagnostic.contains("resolvconf")));
        assert_eq!(controller.lifecycle(), ControllerState::Stopped);
    }

    #[tokio::test]
    async fn test_start_that_never_comes_up_reports_down() {
        let mut backend = MockTunnelBackend::new();
        backend
            .expect_start()
            .returning(|_, _| Ok("wg setconf output".to_string()));
        backend.expect_is_up().returning(|_| false);

        let (controller, _dir) = controller(backend, PeerStats::default());
        let err = controller.start("[Interface]\n").await.unwrap_err();
        assert!(matches!(err, ControlError::Start { .. }));
        assert_eq!(controller.lifecycle(), ControllerState::Down);
    }

    #[tokio::test]
    async fn test_stop_on_never_started_controller_is_noop() {
        let mut backend = MockTunnelBackend::new();
        backend.expect_stop().times(0);

        let (controller, _dir) = controller(backend, PeerStats::default());
        controller.stop().await.unwrap();
        assert_eq!(controller.lifecycle(), ControllerState::Stopped);
    }

    #[tokio::test]
    async fn test_stop_after_start_invokes_backend_once() {
        let mut backend = MockTunnelBackend::new();
        backend.expect_start().returning(|_, _| Ok(String::new()));
        backend.expect_is_up().returning(|_| true);
        backend.expect_stop().times(1).returning(|_| Ok(()));

        let (controller, _dir) = controller(backend, PeerStats::default());
        controller.start("[Interface]\n").await.unwrap();
        controller.stop().await.unwrap();
        assert_eq!(controller.lifecycle(), ControllerState::Stopped);

        // Second stop: already stopped, backend not touched again.
        controller.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_status_on_unbound_backend_is_down_with_zeros() {
        let mut backend = MockTunnelBackend::new();
        backend.expect_is_up().returning(|_| false);

        let (controller, _dir) = controller(backend, PeerStats::default());
        let snapshot = controller.status().await;
        assert_eq!(snapshot.state, TunnelState::Down);
        assert_eq!(snapshot.rx_bytes, 0);
        assert_eq!(snapshot.tx_bytes, 0);
        assert_eq!(snapshot.last_handshake_millis, 0);
    }
}
