//! Tunnel configuration file provisioning

use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use wgctl_proto::TunnelName;

/// Writes tunnel configuration files where the backend expects them.
///
/// Config text holds key material, so files are clamped to owner
/// read/write before any content lands in them, and are overwritten in
/// place on every start. The provisioner only touches the filesystem; it
/// never retains the config text.
#[derive(Debug, Clone)]
pub struct ConfigProvisioner {
    dir: PathBuf,
}

impl ConfigProvisioner {
    /// Directory the platform tunnel tooling reads configs from.
    ///
    /// On Windows the config is handed to the tunnel service by path, so
    /// it lives under the per-user temp directory whose ACL already
    /// restricts access to the owning account.
    pub fn default_dir() -> PathBuf {
        #[cfg(unix)]
        {
            PathBuf::from("/etc/wireguard")
        }
        #[cfg(not(unix))]
        {
            std::env::temp_dir().join("wgctl")
        }
    }

    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path the config for `name` is written to.
    pub fn config_path(&self, name: &TunnelName) -> PathBuf {
        self.dir.join(format!("{name}.conf"))
    }

    /// Persists `config` for `name`, replacing any previous file.
    pub async fn write(&self, name: &TunnelName, config: &str) -> io::Result<PathBuf> {
        fs::create_dir_all(&self.dir).await?;
        let path = self.config_path(name);

        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(0o600);
        let mut file = options.open(&path).await?;

        // An overwritten file keeps its old mode; clamp it while the file
        // is still empty.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).await?;
        }

        file.write_all(config.as_bytes()).await?;
        file.flush().await?;
        debug!(tunnel = %name, path = %path.display(), "tunnel config written");
        Ok(path)
    }
}

impl Default for ConfigProvisioner {
    fn default() -> Self {
        Self::new(Self::default_dir())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> TunnelName {
        TunnelName::new(s).unwrap()
    }

    #[tokio::test]
    async fn test_write_places_config_under_dir() {
        let dir = tempfile::tempdir().unwrap();
        let provisioner = ConfigProvisioner::new(dir.path());

        let path = provisioner
            .write(&name("wg0"), "[Interface]\nPrivateKey = x\n")
            .await
            .unwrap();

        assert_eq!(path, dir.path().join("wg0.conf"));
        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written, "[Interface]\nPrivateKey = x\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_write_restricts_permissions_to_owner() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let provisioner = ConfigProvisioner::new(dir.path());

        let path = provisioner.write(&name("wg0"), "secret").await.unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn test_write_overwrites_previous_config() {
        let dir = tempfile::tempdir().unwrap();
        let provisioner = ConfigProvisioner::new(dir.path());

        provisioner.write(&name("wg0"), "first").await.unwrap();
        let path = provisioner.write(&name("wg0"), "second").await.unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "second");
    }
}
