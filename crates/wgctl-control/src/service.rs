//! Managed-service tunnel backends
//!
//! Instead of holding a child process, these backends register the
//! tunnel with the platform service manager: a generated unit bound to
//! the provisioned config file on systemd hosts, or a service created
//! through the SCM on Windows. The service manager owns the tunnel
//! process; start/stop/query go through it.

use crate::backend::{BackendError, TunnelBackend};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};
use wgctl_proto::TunnelName;
use wgctl_telemetry::{CommandOutput, CommandRunner, SystemRunner};

/// Unit name a tunnel's service is registered under.
fn unit_name(name: &TunnelName) -> String {
    format!("wgctl-{name}.service")
}

/// Backend that runs each tunnel under a generated systemd unit.
///
/// The unit is rewritten on every start with a command line referencing
/// the provisioned config file, then started; teardown stops the unit.
pub struct SystemdServiceBackend<R = SystemRunner> {
    runner: R,
    unit_dir: PathBuf,
}

impl SystemdServiceBackend<SystemRunner> {
    pub fn new() -> Self {
        Self {
            runner: SystemRunner,
            unit_dir: PathBuf::from("/etc/systemd/system"),
        }
    }
}

impl Default for SystemdServiceBackend<SystemRunner> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: CommandRunner> SystemdServiceBackend<R> {
    pub fn with_runner(runner: R, unit_dir: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            unit_dir: unit_dir.into(),
        }
    }

    fn render_unit(name: &TunnelName, config_path: &Path) -> String {
        format!(
            r#"[Unit]
Description={name} WireGuard tunnel
After=network-online.target nss-lookup.target
Wants=network-online.target

[Service]
Type=oneshot
RemainAfterExit=yes
ExecStart=/usr/bin/wg-quick up {config}
ExecStop=/usr/bin/wg-quick down {config}

[Install]
WantedBy=multi-user.target
"#,
            name = name,
            config = config_path.display(),
        )
    }

    async fn systemctl(&self, args: &[&str]) -> Result<CommandOutput, BackendError> {
        self.runner
            .run("systemctl", args)
            .await
            .map_err(|source| BackendError::Spawn {
                tool: "systemctl".to_string(),
                source,
            })
    }
}

#[async_trait]
impl<R: CommandRunner> TunnelBackend for SystemdServiceBackend<R> {
    async fn start(&self, name: &TunnelName, config_path: &Path) -> Result<String, BackendError> {
        let unit = unit_name(name);
        let unit_path = self.unit_dir.join(&unit);
        info!(tunnel = %name, unit = %unit, "registering tunnel service");

        fs::write(&unit_path, Self::render_unit(name, config_path))
            .await
            .map_err(|source| BackendError::Spawn {
                tool: unit_path.display().to_string(),
                source,
            })?;
        self.systemctl(&["daemon-reload"]).await?;

        let output = self.systemctl(&["start", &unit]).await?;
        let diagnostic = format!("{}\n{}", output.stdout.trim(), output.stderr.trim())
            .trim()
            .to_string();
        if !output.success {
            return Err(BackendError::Failed(diagnostic));
        }
        Ok(diagnostic)
    }

    async fn stop(&self, name: &TunnelName) -> Result<(), BackendError> {
        let unit = unit_name(name);
        info!(tunnel = %name, unit = %unit, "stopping tunnel service");
        let output = self.systemctl(&["stop", &unit]).await?;
        // A unit that was never loaded has nothing to stop.
        if !output.success && !output.stderr.contains("not loaded") {
            return Err(BackendError::Failed(output.stderr.trim().to_string()));
        }
        Ok(())
    }

    async fn is_up(&self, name: &TunnelName) -> bool {
        match self.systemctl(&["is-active", &unit_name(name)]).await {
            Ok(output) => output.stdout.trim() == "active",
            Err(err) => {
                debug!(tunnel = %name, error = %err, "service status query failed");
                false
            }
        }
    }
}

#[cfg(windows)]
pub use scm::ScmServiceBackend;

/// Service control through the Windows SCM.
#[cfg(windows)]
mod scm {
    use super::*;
    use std::io;
    use std::iter::once;
    use std::ptr::{null, null_mut};
    use windows_sys::Win32::Foundation::{
        GetLastError, ERROR_SERVICE_ALREADY_RUNNING, ERROR_SERVICE_DOES_NOT_EXIST,
        ERROR_SERVICE_EXISTS, ERROR_SERVICE_NOT_ACTIVE,
    };
    use windows_sys::Win32::System::Services::{
        ChangeServiceConfig2W, CloseServiceHandle, ControlService, CreateServiceW,
        OpenSCManagerW, OpenServiceW, QueryServiceStatus, StartServiceW, SC_HANDLE,
        SC_MANAGER_ALL_ACCESS, SERVICE_ALL_ACCESS, SERVICE_CONFIG_DESCRIPTION,
        SERVICE_CONTROL_STOP, SERVICE_DEMAND_START, SERVICE_DESCRIPTIONW, SERVICE_ERROR_NORMAL,
        SERVICE_RUNNING, SERVICE_STATUS, SERVICE_WIN32_OWN_PROCESS,
    };

    /// Services the tunnel service depends on, double-NUL terminated.
    const SERVICE_DEPENDENCIES: &str = "Nsi\0TcpIp\0\0";

    fn wide(s: &str) -> Vec<u16> {
        s.encode_utf16().chain(once(0)).collect()
    }

    struct OwnedScHandle(SC_HANDLE);

    // SCM handles may be used from the blocking worker thread they were
    // opened on and are closed exactly once.
    unsafe impl Send for OwnedScHandle {}

    impl Drop for OwnedScHandle {
        fn drop(&mut self) {
            unsafe {
                CloseServiceHandle(self.0);
            }
        }
    }

    fn open_manager() -> Result<OwnedScHandle, BackendError> {
        let handle = unsafe { OpenSCManagerW(null(), null(), SC_MANAGER_ALL_ACCESS) };
        if handle.is_null() {
            return Err(scm_error("opening the service manager"));
        }
        Ok(OwnedScHandle(handle))
    }

    fn open_service(manager: &OwnedScHandle, name: &str) -> Result<Option<OwnedScHandle>, BackendError> {
        let handle = unsafe { OpenServiceW(manager.0, wide(name).as_ptr(), SERVICE_ALL_ACCESS) };
        if handle.is_null() {
            if unsafe { GetLastError() } == ERROR_SERVICE_DOES_NOT_EXIST {
                return Ok(None);
            }
            return Err(scm_error("opening the tunnel service"));
        }
        Ok(Some(OwnedScHandle(handle)))
    }

    fn scm_error(doing: &str) -> BackendError {
        BackendError::Failed(format!(
            "{doing} failed: {}",
            io::Error::last_os_error()
        ))
    }

    /// Backend that registers each tunnel as a Windows service wrapping
    /// the tunnel service executable.
    pub struct ScmServiceBackend {
        service_exe: PathBuf,
    }

    impl ScmServiceBackend {
        /// Uses the tunnel service executable shipped next to the
        /// current binary.
        pub fn new() -> io::Result<Self> {
            let exe = std::env::current_exe()?;
            let dir = exe.parent().ok_or_else(|| {
                io::Error::new(io::ErrorKind::NotFound, "executable has no parent directory")
            })?;
            Ok(Self {
                service_exe: dir.join("wireguard_svc.exe"),
            })
        }

        pub fn with_exe(service_exe: impl Into<PathBuf>) -> Self {
            Self {
                service_exe: service_exe.into(),
            }
        }

        fn command_line(&self, config_path: &Path) -> String {
            format!(
                "\"{}\" -service -config-file=\"{}\"",
                self.service_exe.display(),
                config_path.display()
            )
        }

        fn create_or_open(
            manager: &OwnedScHandle,
            name: &TunnelName,
            command_line: &str,
        ) -> Result<OwnedScHandle, BackendError> {
            if let Some(service) = open_service(manager, name.as_str())? {
                return Ok(service);
            }

            let display_name = wide(name.as_str());
            let description = format!("{name} WireGuard tunnel");
            let handle = unsafe {
                CreateServiceW(
                    manager.0,
                    wide(name.as_str()).as_ptr(),
                    display_name.as_ptr(),
                    SERVICE_ALL_ACCESS,
                    SERVICE_WIN32_OWN_PROCESS,
                    SERVICE_DEMAND_START,
                    SERVICE_ERROR_NORMAL,
                    wide(command_line).as_ptr(),
                    null(),
                    null_mut(),
                    wide(SERVICE_DEPENDENCIES).as_ptr(),
                    null(),
                    null(),
                )
            };
            if handle.is_null() {
                if unsafe { GetLastError() } == ERROR_SERVICE_EXISTS {
                    return open_service(manager, name.as_str())?
                        .ok_or_else(|| scm_error("reopening the tunnel service"));
                }
                return Err(scm_error("creating the tunnel service"));
            }
            let service = OwnedScHandle(handle);

            let mut description_wide = wide(&description);
            let info = SERVICE_DESCRIPTIONW {
                lpDescription: description_wide.as_mut_ptr(),
            };
            unsafe {
                ChangeServiceConfig2W(
                    service.0,
                    SERVICE_CONFIG_DESCRIPTION,
                    &info as *const SERVICE_DESCRIPTIONW as *const _,
                );
            }
            Ok(service)
        }

        fn start_blocking(
            name: &TunnelName,
            command_line: &str,
        ) -> Result<String, BackendError> {
            let manager = open_manager()?;
            let service = Self::create_or_open(&manager, name, command_line)?;

            let ok = unsafe { StartServiceW(service.0, 0, null()) };
            if ok == 0 && unsafe { GetLastError() } != ERROR_SERVICE_ALREADY_RUNNING {
                return Err(scm_error("starting the tunnel service"));
            }
            Ok(String::new())
        }

        fn stop_blocking(name: &TunnelName) -> Result<(), BackendError> {
            let manager = open_manager()?;
            let Some(service) = open_service(&manager, name.as_str())? else {
                return Ok(());
            };

            let mut status: SERVICE_STATUS = unsafe { std::mem::zeroed() };
            let ok = unsafe { ControlService(service.0, SERVICE_CONTROL_STOP, &mut status) };
            if ok == 0 && unsafe { GetLastError() } != ERROR_SERVICE_NOT_ACTIVE {
                return Err(scm_error("stopping the tunnel service"));
            }
            Ok(())
        }

        fn is_up_blocking(name: &TunnelName) -> bool {
            let Ok(manager) = open_manager() else {
                return false;
            };
            let Ok(Some(service)) = open_service(&manager, name.as_str()) else {
                return false;
            };
            let mut status: SERVICE_STATUS = unsafe { std::mem::zeroed() };
            let ok = unsafe { QueryServiceStatus(service.0, &mut status) };
            ok != 0 && status.dwCurrentState == SERVICE_RUNNING
        }
    }

    #[async_trait]
    impl TunnelBackend for ScmServiceBackend {
        async fn start(&self, name: &TunnelName, config_path: &Path) -> Result<String, BackendError> {
            info!(tunnel = %name, "registering tunnel service");
            let command_line = self.command_line(config_path);
            let name = name.clone();
            run_blocking(move || Self::start_blocking(&name, &command_line)).await
        }

        async fn stop(&self, name: &TunnelName) -> Result<(), BackendError> {
            info!(tunnel = %name, "stopping tunnel service");
            let name = name.clone();
            run_blocking(move || Self::stop_blocking(&name)).await
        }

        async fn is_up(&self, name: &TunnelName) -> bool {
            let name = name.clone();
            run_blocking(move || Ok(Self::is_up_blocking(&name)))
                .await
                .unwrap_or(false)
        }
    }

    /// Service-control calls block for unbounded wall-clock time; keep
    /// them off the async executor threads.
    async fn run_blocking<T, F>(f: F) -> Result<T, BackendError>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, BackendError> + Send + 'static,
    {
        match tokio::task::spawn_blocking(f).await {
            Ok(result) => result,
            Err(err) => Err(BackendError::Failed(format!(
                "service control task failed: {err}"
            ))),
        }
    }
}
