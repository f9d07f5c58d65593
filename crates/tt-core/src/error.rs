//! Core error types for Tether

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by the SSH transport
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The server rejected our credentials
    #[error("authentication failed")]
    AuthFailed,

    /// DNS failure, refused connection or connect timeout
    #[error("host unreachable: {0}")]
    HostUnreachable(String),

    /// The local side of a forward could not be bound
    #[error("local address {0} is already in use")]
    LocalPortInUse(String),

    /// The tunnel needs the overlay but it is not connected
    #[error("overlay network is not connected")]
    OverlayUnavailable,

    /// Host key did not match the configured fingerprint
    #[error("host key verification failed: {0}")]
    HostKeyRejected(String),

    /// A remote command did not finish in time
    #[error("remote command timed out after {0:?}")]
    CommandTimeout(Duration),

    /// Opening or driving an SSH channel failed
    #[error("channel error: {0}")]
    Channel(String),

    /// Local I/O failure (reading keys, uploads)
    #[error("{0}")]
    Io(String),
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        TransportError::Io(e.to_string())
    }
}

/// Overlay-related errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OverlayError {
    /// The overlay did not report connected before the deadline
    #[error("overlay did not connect within {0:?}")]
    Timeout(Duration),
}

/// Remote provisioning errors. These never abort a connection attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProvisionError {
    /// Installer upload or execution failed
    #[error("install failed: {0}")]
    InstallFailed(String),

    /// The daemon could not be launched
    #[error("daemon start failed: {0}")]
    DaemonStartFailed(String),

    /// Transport failure while probing
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Errors that change the orchestrator's own phase
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrchestratorError {
    /// Not every gating tunnel became ready in time
    #[error("tunnels not ready after {timeout:?}: {detail}")]
    ReadinessTimeout { timeout: Duration, detail: String },

    /// The overlay gate failed
    #[error(transparent)]
    Overlay(#[from] OverlayError),

    /// The profile could not be turned into tunnel specs
    #[error("invalid profile: {0}")]
    InvalidProfile(String),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Unknown profile name
    #[error("Unknown profile: {0}")]
    UnknownProfile(String),

    /// A credential referenced by a profile is missing
    #[error("Missing secret: {0}")]
    MissingSecret(String),
}

/// Secret storage errors
#[derive(Error, Debug)]
pub enum SecretError {
    /// Reading or writing the secrets file failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The secrets file is not valid JSON
    #[error("corrupt secrets file: {0}")]
    Corrupt(#[from] serde_json::Error),
}
