//! Controller factory keyed by tunnel identity
//!
//! The registry creates one [`TunnelController`] per validated tunnel
//! name, on first use, and hands back the same instance afterwards. A
//! controller never changes its name; operations on a different name
//! address a different controller. Each entry also owns that tunnel's
//! single telemetry subscription.

use crate::backend::TunnelBackend;
use crate::broadcast::TelemetryBroadcaster;
use crate::controller::TunnelController;
use crate::error::ControlError;
use crate::provision::ConfigProvisioner;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::debug;
use wgctl_proto::{TunnelName, TunnelSnapshot};
use wgctl_telemetry::TelemetryReader;

struct TunnelEntry {
    controller: Arc<TunnelController>,
    broadcaster: TelemetryBroadcaster,
}

/// Creates and caches controllers, one per tunnel name.
pub struct ControllerRegistry {
    provisioner: ConfigProvisioner,
    backend: Arc<dyn TunnelBackend>,
    reader: Arc<dyn TelemetryReader>,
    entries: Mutex<HashMap<TunnelName, Arc<TunnelEntry>>>,
}

impl ControllerRegistry {
    pub fn new(
        provisioner: ConfigProvisioner,
        backend: Arc<dyn TunnelBackend>,
        reader: Arc<dyn TelemetryReader>,
    ) -> Self {
        Self {
            provisioner,
            backend,
            reader,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Registry wired to this platform's default backend and telemetry
    /// reader, with configs provisioned under `config_dir`.
    #[cfg(unix)]
    pub fn platform(config_dir: impl Into<std::path::PathBuf>) -> std::io::Result<Self> {
        use crate::backend::WgQuickBackend;
        use wgctl_telemetry::WgToolReader;

        let config_dir = config_dir.into();
        Ok(Self::new(
            ConfigProvisioner::new(&config_dir),
            Arc::new(WgQuickBackend::new(config_dir)),
            Arc::new(WgToolReader::new()),
        ))
    }

    /// Registry wired to this platform's default backend and telemetry
    /// reader, with configs provisioned under `config_dir`.
    #[cfg(windows)]
    pub fn platform(config_dir: impl Into<std::path::PathBuf>) -> std::io::Result<Self> {
        use crate::service::ScmServiceBackend;
        use wgctl_telemetry::DriverReader;

        Ok(Self::new(
            ConfigProvisioner::new(config_dir.into()),
            Arc::new(ScmServiceBackend::new()?),
            Arc::new(DriverReader::system()),
        ))
    }

    fn entry(&self, name: &TunnelName) -> Arc<TunnelEntry> {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.get(name) {
            return Arc::clone(entry);
        }
        debug!(tunnel = %name, "creating controller");
        let controller = Arc::new(TunnelController::new(
            name.clone(),
            self.provisioner.clone(),
            Arc::clone(&self.backend),
            Arc::clone(&self.reader),
        ));
        let entry = Arc::new(TunnelEntry {
            broadcaster: TelemetryBroadcaster::new(Arc::clone(&controller)),
            controller,
        });
        entries.insert(name.clone(), Arc::clone(&entry));
        entry
    }

    fn existing(&self, name: &TunnelName) -> Option<Arc<TunnelEntry>> {
        self.entries.lock().unwrap().get(name).cloned()
    }

    /// The controller bound to `name`, created on first use.
    pub fn controller(&self, name: &TunnelName) -> Arc<TunnelController> {
        Arc::clone(&self.entry(name).controller)
    }

    /// Provisions `config` and brings the tunnel `name` up.
    pub async fn start(&self, name: &TunnelName, config: &str) -> Result<(), ControlError> {
        if config.trim().is_empty() {
            return Err(ControlError::InvalidArgument(
                "tunnel config is empty".to_string(),
            ));
        }
        self.entry(name).controller.start(config).await
    }

    /// Tears the tunnel `name` down. Unknown names have nothing bound,
    /// so stopping them succeeds as a no-op.
    pub async fn stop(&self, name: &TunnelName) -> Result<(), ControlError> {
        match self.existing(name) {
            Some(entry) => entry.controller.stop().await,
            None => Ok(()),
        }
    }

    /// One fresh snapshot for `name`. Queries the live backend even for
    /// names this registry never started: the tunnel may be up from a
    /// previous process.
    pub async fn status(&self, name: &TunnelName) -> TunnelSnapshot {
        self.entry(name).controller.status().await
    }

    /// Attaches `sink` as the sole status subscriber for `name`.
    pub fn listen(&self, name: &TunnelName, sink: mpsc::Sender<TunnelSnapshot>) {
        self.entry(name).broadcaster.listen(sink);
    }

    /// Detaches the subscriber for `name`, if any.
    pub fn cancel(&self, name: &TunnelName) {
        if let Some(entry) = self.existing(name) {
            entry.broadcaster.cancel();
        }
    }

    /// Tears down the entry for `name`: cancels any subscription, stops
    /// the tunnel and drops the controller.
    pub async fn remove(&self, name: &TunnelName) -> Result<(), ControlError> {
        let entry = self.entries.lock().unwrap().remove(name);
        match entry {
            Some(entry) => {
                entry.broadcaster.cancel();
                entry.controller.stop().await
            }
            None => Ok(()),
        }
    }
}
