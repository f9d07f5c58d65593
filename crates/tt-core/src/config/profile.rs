//! Target profile configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::serde_utils::{duration_secs, expand_home};
use crate::error::ConfigError;
use crate::traits::SecretStore;
use crate::types::{Credential, SshTarget};

/// How a profile relates to the overlay network
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverlayMode {
    /// Bring the overlay up and route SSH through its proxy
    Required,
    /// Tear down any overlay session left by another profile
    Disabled,
    /// Leave the overlay alone
    #[default]
    Unmanaged,
}

/// SSH authentication method
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
    #[default]
    Password,
    Key,
}

/// A remote host and the services to reach on it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetProfile {
    /// Profile name, filled in from the `[profiles.<name>]` key
    #[serde(skip)]
    pub name: String,

    /// SSH host name or address
    pub host: String,

    /// SSH port
    pub ssh_port: u16,

    /// SSH login
    pub username: String,

    /// Credential kind
    pub auth: AuthMethod,

    /// Secret-store key holding the SSH password (defaults to `<name>.ssh`)
    pub password_secret: Option<String>,

    /// Private key for `auth = "key"`
    pub private_key_path: Option<PathBuf>,

    /// Secret-store key holding the private key passphrase
    pub key_passphrase_secret: Option<String>,

    /// Expected host key fingerprint
    pub host_key: Option<String>,

    /// Overlay policy
    pub overlay: OverlayMode,

    /// Control service host as seen from the remote side
    pub control_host: String,

    /// Control service port on the remote side
    pub control_port: u16,

    /// Provision and tunnel the file-server daemon
    pub file_server: bool,

    /// Share directory used when the control service cannot be asked
    pub share_path: Option<String>,

    /// Control RPC basic-auth user
    pub rpc_username: Option<String>,

    /// Secret-store key for the control RPC password (defaults to `<name>.rpc`)
    pub rpc_password_secret: Option<String>,

    /// TCP/SSH handshake timeout
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,
}

impl Default for TargetProfile {
    fn default() -> Self {
        Self {
            name: String::new(),
            host: String::new(),
            ssh_port: 22,
            username: whoami::username(),
            auth: AuthMethod::default(),
            password_secret: None,
            private_key_path: None,
            key_passphrase_secret: None,
            host_key: None,
            overlay: OverlayMode::default(),
            control_host: "127.0.0.1".to_string(),
            control_port: 9091,
            file_server: false,
            share_path: None,
            rpc_username: None,
            rpc_password_secret: None,
            connect_timeout: Duration::from_secs(15),
        }
    }
}

impl TargetProfile {
    /// Create a profile for `host` with defaults everywhere else
    pub fn new(host: impl Into<String>) -> Self {
        let host = host.into();
        Self {
            name: host.clone(),
            host,
            ..Default::default()
        }
    }

    /// Whether the overlay must be connected before any tunnel
    pub fn requires_overlay(&self) -> bool {
        self.overlay == OverlayMode::Required
    }

    /// SSH endpoint as `host:port`
    pub fn ssh_endpoint(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.ssh_port)
        } else {
            format!("{}:{}", self.host, self.ssh_port)
        }
    }

    /// Secret key holding the SSH password
    pub fn password_secret_key(&self) -> String {
        self.password_secret
            .clone()
            .unwrap_or_else(|| format!("{}.ssh", self.name))
    }

    /// Secret key holding the control RPC password
    pub fn rpc_secret_key(&self) -> String {
        self.rpc_password_secret
            .clone()
            .unwrap_or_else(|| format!("{}.rpc", self.name))
    }

    /// Secret key holding the file server's basic-auth secret
    pub fn file_server_secret_key(&self) -> String {
        format!("{}.file-server", self.name)
    }

    /// Resolve the SSH target, looking credentials up in `secrets`.
    ///
    /// The proxy is left unset; it is resolved per tunnel from the overlay.
    pub fn ssh_target(&self, secrets: &dyn SecretStore) -> Result<SshTarget, ConfigError> {
        if self.host.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "profile '{}' has no host",
                self.name
            )));
        }

        let credential = match self.auth {
            AuthMethod::Password => {
                let key = self.password_secret_key();
                let password = secrets
                    .get(&key)
                    .ok_or(ConfigError::MissingSecret(key))?;
                Credential::Password(password)
            }
            AuthMethod::Key => {
                let path = self.private_key_path.as_ref().ok_or_else(|| {
                    ConfigError::Invalid(format!(
                        "profile '{}' uses key auth but has no private_key_path",
                        self.name
                    ))
                })?;
                let passphrase = self
                    .key_passphrase_secret
                    .as_ref()
                    .and_then(|key| secrets.get(key));
                Credential::KeyFile {
                    path: expand_home(path),
                    passphrase,
                }
            }
        };

        Ok(SshTarget {
            endpoint: self.ssh_endpoint(),
            proxy: None,
            username: self.username.clone(),
            credential,
            host_key: self.host_key.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::MemorySecretStore;

    #[test]
    fn test_profile_defaults_from_toml() {
        let profile: TargetProfile = toml::from_str(r#"host = "box.example.com""#).unwrap();
        assert_eq!(profile.ssh_port, 22);
        assert_eq!(profile.control_port, 9091);
        assert_eq!(profile.control_host, "127.0.0.1");
        assert_eq!(profile.overlay, OverlayMode::Unmanaged);
        assert!(!profile.file_server);
        assert!(!profile.requires_overlay());
    }

    #[test]
    fn test_overlay_mode_parsing() {
        let profile: TargetProfile =
            toml::from_str("host = \"h\"\noverlay = \"required\"").unwrap();
        assert!(profile.requires_overlay());

        let profile: TargetProfile =
            toml::from_str("host = \"h\"\noverlay = \"disabled\"").unwrap();
        assert_eq!(profile.overlay, OverlayMode::Disabled);
    }

    #[test]
    fn test_ssh_endpoint_brackets_ipv6() {
        let mut profile = TargetProfile::new("fd7a:115c::1");
        profile.ssh_port = 2222;
        assert_eq!(profile.ssh_endpoint(), "[fd7a:115c::1]:2222");
        assert_eq!(TargetProfile::new("box").ssh_endpoint(), "box:22");
    }

    #[test]
    fn test_password_target_needs_secret() {
        let secrets = MemorySecretStore::new();
        let mut profile = TargetProfile::new("box");
        profile.name = "seedbox".to_string();

        let err = profile.ssh_target(&secrets).unwrap_err();
        assert!(matches!(err, ConfigError::MissingSecret(ref k) if k == "seedbox.ssh"));

        secrets.set("seedbox.ssh", "pw").unwrap();
        let target = profile.ssh_target(&secrets).unwrap();
        assert_eq!(target.credential, Credential::Password("pw".to_string()));
        assert_eq!(target.endpoint, "box:22");
        assert!(target.proxy.is_none());
    }

    #[test]
    fn test_key_target_requires_path() {
        let secrets = MemorySecretStore::new();
        let mut profile = TargetProfile::new("box");
        profile.auth = AuthMethod::Key;
        assert!(matches!(
            profile.ssh_target(&secrets),
            Err(ConfigError::Invalid(_))
        ));

        profile.private_key_path = Some(PathBuf::from("/keys/id_ed25519"));
        let target = profile.ssh_target(&secrets).unwrap();
        assert!(matches!(target.credential, Credential::KeyFile { ref path, passphrase: None }
            if path == &PathBuf::from("/keys/id_ed25519")));
    }
}
