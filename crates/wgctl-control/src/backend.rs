//! Tunnel backend abstraction
//!
//! A backend is the platform mechanism that actually creates and tears
//! down a tunnel: a controlled subprocess invocation of the `wg-quick`
//! script, or a managed background service (see [`crate::service`]).
//! Which implementation a controller gets is decided once, at
//! construction, never by scattered platform branches at call sites.

use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use tracing::info;
use wgctl_proto::TunnelName;
use wgctl_telemetry::{link_is_up, CommandRunner, SystemRunner};

/// Backend operation failures
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("failed to invoke {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: io::Error,
    },

    /// The backend ran but reported failure; carries its combined output.
    #[error("{0}")]
    Failed(String),
}

/// Drives the platform mechanism that creates and tears down a tunnel.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TunnelBackend: Send + Sync {
    /// Launches the tunnel for `name` from `config_path` and returns the
    /// backend's diagnostic output.
    async fn start(&self, name: &TunnelName, config_path: &Path) -> Result<String, BackendError>;

    /// Tears the tunnel down.
    async fn stop(&self, name: &TunnelName) -> Result<(), BackendError>;

    /// Live query: is the tunnel passing traffic right now?
    async fn is_up(&self, name: &TunnelName) -> bool;
}

/// Backend that drives the `wg-quick` control script.
///
/// Invocations are argument vectors handed straight to the process
/// spawner; tunnel names and paths are never interpolated into a shell
/// line.
pub struct WgQuickBackend<R = SystemRunner> {
    runner: R,
    /// Where provisioned configs live; teardown resolves the config path
    /// from here since `wg-quick down` only knows its default directory.
    config_dir: PathBuf,
}

impl WgQuickBackend<SystemRunner> {
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            runner: SystemRunner,
            config_dir: config_dir.into(),
        }
    }
}

impl<R: CommandRunner> WgQuickBackend<R> {
    pub fn with_runner(runner: R, config_dir: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            config_dir: config_dir.into(),
        }
    }

    async fn wg_quick(&self, verb: &str, target: &str) -> Result<String, BackendError> {
        let output = self
            .runner
            .run("wg-quick", &[verb, target])
            .await
            .map_err(|source| BackendError::Spawn {
                tool: "wg-quick".to_string(),
                source,
            })?;
        let mut combined = output.stdout;
        if !output.stderr.is_empty() {
            if !combined.is_empty() {
                combined.push('\n');
            }
            combined.push_str(&output.stderr);
        }
        if !output.success {
            return Err(BackendError::Failed(combined.trim().to_string()));
        }
        Ok(combined)
    }
}

#[async_trait]
impl<R: CommandRunner> TunnelBackend for WgQuickBackend<R> {
    async fn start(&self, name: &TunnelName, config_path: &Path) -> Result<String, BackendError> {
        info!(tunnel = %name, "bringing tunnel up");
        let target = config_path.to_string_lossy();
        self.wg_quick("up", &target).await
    }

    async fn stop(&self, name: &TunnelName) -> Result<(), BackendError> {
        info!(tunnel = %name, "taking tunnel down");
        let config_path = self.config_dir.join(format!("{name}.conf"));
        self.wg_quick("down", &config_path.to_string_lossy()).await?;
        Ok(())
    }

    async fn is_up(&self, name: &TunnelName) -> bool {
        link_is_up(&self.runner, name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use wgctl_telemetry::CommandOutput;

    /// Records every argv and replies with one canned output.
    struct RecordingRunner {
        reply: CommandOutput,
        calls: Mutex<Vec<String>>,
    }

    impl RecordingRunner {
        fn new(success: bool, stdout: &str, stderr: &str) -> Self {
            Self {
                reply: CommandOutput {
                    success,
                    stdout: stdout.to_string(),
                    stderr: stderr.to_string(),
                },
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CommandRunner for RecordingRunner {
        async fn run(&self, program: &str, args: &[&str]) -> io::Result<CommandOutput> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("{} {}", program, args.join(" ")));
            Ok(self.reply.clone())
        }
    }

    fn name() -> TunnelName {
        TunnelName::new("wg0").unwrap()
    }

    #[tokio::test]
    async fn test_start_invokes_wg_quick_with_config_path() {
        let backend =
            WgQuickBackend::with_runner(RecordingRunner::new(true, "", ""), "/etc/wireguard");
        backend
            .start(&name(), Path::new("/etc/wireguard/wg0.conf"))
            .await
            .unwrap();
        assert_eq!(
            *backend.runner.calls.lock().unwrap(),
            vec!["wg-quick up /etc/wireguard/wg0.conf".to_string()]
        );
    }

    #[tokio::test]
    async fn test_stop_resolves_config_path_from_dir() {
        let backend =
            WgQuickBackend::with_runner(RecordingRunner::new(true, "", ""), "/opt/tunnels");
        backend.stop(&name()).await.unwrap();
        assert_eq!(
            *backend.runner.calls.lock().unwrap(),
            vec!["wg-quick down /opt/tunnels/wg0.conf".to_string()]
        );
    }

    #[tokio::test]
    async fn test_failed_start_carries_combined_output() {
        let backend = WgQuickBackend::with_runner(
            RecordingRunner::new(false, "[#] ip link add wg0", "RTNETLINK answers: not permitted"),
            "/etc/wireguard",
        );
        let err = backend
            .start(&name(), Path::new("/etc/wireguard/wg0.conf"))
            .await
            .unwrap_err();
        let diagnostic = err.to_string();
        assert!(diagnostic.contains("ip link add"));
        assert!(diagnostic.contains("not permitted"));
    }
}
