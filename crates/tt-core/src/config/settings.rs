//! Top-level config file layout

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use super::TargetProfile;
use crate::error::ConfigError;

/// The whole `config.toml`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    /// Overlay (Tailscale) settings
    pub overlay: OverlayConfig,

    /// Remote file-server daemon settings
    pub file_server: FileServerConfig,

    /// Profiles keyed by name
    pub profiles: BTreeMap<String, TargetProfile>,
}

impl ConfigFile {
    /// Look up a profile by name, with its `name` field filled in
    pub fn profile(&self, name: &str) -> Result<TargetProfile, ConfigError> {
        let mut profile = self
            .profiles
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownProfile(name.to_string()))?;
        profile.name = name.to_string();
        Ok(profile)
    }
}

/// Overlay network settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    /// Path or name of the `tailscale` CLI
    pub cli: String,

    /// Local SOCKS5 proxy exposed by a userspace `tailscaled`
    /// (`tailscaled --socks5-server=localhost:1055`). When unset SSH dials
    /// directly and relies on the kernel interface.
    pub socks5_proxy: Option<String>,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            cli: "tailscale".to_string(),
            socks5_proxy: None,
        }
    }
}

/// Remote file-server daemon settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileServerConfig {
    /// Daemon binary name, also used to match its process
    pub binary: String,

    /// Remote install directory (may reference `$HOME`)
    pub install_dir: String,

    /// Local installer script uploaded when the binary is missing
    pub installer_script: PathBuf,

    /// Basic-auth user embedded in the daemon's arguments
    pub auth_user: String,
}

impl Default for FileServerConfig {
    fn default() -> Self {
        Self {
            binary: "dufs".to_string(),
            install_dir: "$HOME/.local/bin".to_string(),
            installer_script: super::default_config_dir().join("install-file-server.sh"),
            auth_user: "tether".to_string(),
        }
    }
}

impl FileServerConfig {
    /// Full remote path of the daemon binary
    pub fn install_path(&self) -> String {
        format!("{}/{}", self.install_dir.trim_end_matches('/'), self.binary)
    }
}
