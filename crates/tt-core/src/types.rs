//! Core domain types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Name of a logical tunnel ("control", "files", ...)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TunnelId(pub String);

impl TunnelId {
    /// Tunnel carrying the RPC control API
    pub const CONTROL: &'static str = "control";
    /// Tunnel carrying the auxiliary file server
    pub const FILES: &'static str = "files";

    /// Create a new tunnel ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The control tunnel's ID
    pub fn control() -> Self {
        Self::new(Self::CONTROL)
    }

    /// The file-server tunnel's ID
    pub fn files() -> Self {
        Self::new(Self::FILES)
    }

    /// Get the raw ID string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TunnelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TunnelId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TunnelId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// How the SSH session authenticates
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// Password authentication
    Password(String),
    /// Public key authentication with a key file on disk
    KeyFile {
        path: PathBuf,
        passphrase: Option<String>,
    },
}

// Never print secret material
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Password(_) => f.write_str("Password(***)"),
            Credential::KeyFile { path, .. } => f
                .debug_struct("KeyFile")
                .field("path", path)
                .finish_non_exhaustive(),
        }
    }
}

/// Everything the transport needs to reach the SSH server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTarget {
    /// SSH endpoint as `host:port`
    pub endpoint: String,
    /// SOCKS5 proxy (`host:port`) to dial the endpoint through
    pub proxy: Option<String>,
    /// Login name
    pub username: String,
    /// Credential
    pub credential: Credential,
    /// Expected host key fingerprint
    pub host_key: Option<String>,
}

impl SshTarget {
    /// Same target, routed through `proxy`
    pub fn with_proxy(mut self, proxy: Option<String>) -> Self {
        self.proxy = proxy;
        self
    }
}

/// Immutable description of one tunnel for one connection attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelSpec {
    /// Logical name
    pub id: TunnelId,
    /// Address to reach from the remote side (`host:port`)
    pub remote_address: String,
    /// Address to listen on locally (`host:port`)
    pub local_address: String,
    /// SSH target (proxy unresolved)
    pub target: SshTarget,
    /// Whether the SSH session is routed through the overlay proxy
    pub use_overlay: bool,
    /// Whether the connection cannot succeed without this tunnel
    pub essential: bool,
}

impl TunnelSpec {
    /// Port component of the local address
    pub fn local_port(&self) -> Option<u16> {
        port_of(&self.local_address)
    }

    /// Port component of the remote address
    pub fn remote_port(&self) -> Option<u16> {
        port_of(&self.remote_address)
    }
}

/// Extract the port from a `host:port` string
pub fn port_of(address: &str) -> Option<u16> {
    address.rsplit_once(':').and_then(|(_, p)| p.parse().ok())
}

/// Lifecycle phase of a single tunnel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TunnelPhase {
    /// Known but never started
    Idle,
    /// Forward is being established
    Connecting,
    /// Forward established and accepting connections
    Active,
    /// Transport error, provisioning failure or liveness timeout
    Failed,
}

impl fmt::Display for TunnelPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TunnelPhase::Idle => write!(f, "idle"),
            TunnelPhase::Connecting => write!(f, "connecting"),
            TunnelPhase::Active => write!(f, "active"),
            TunnelPhase::Failed => write!(f, "failed"),
        }
    }
}

/// Observable state of one tunnel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelState {
    pub id: TunnelId,
    pub phase: TunnelPhase,
    pub local_port: Option<u16>,
    pub last_error: Option<String>,
}

impl TunnelState {
    /// A fresh Idle state
    pub fn idle(id: TunnelId) -> Self {
        Self {
            id,
            phase: TunnelPhase::Idle,
            local_port: None,
            last_error: None,
        }
    }

    /// Whether the tunnel is Active
    pub fn is_active(&self) -> bool {
        self.phase == TunnelPhase::Active
    }
}

/// Overall connection phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionPhase {
    /// No connection (possibly with a last error)
    Disconnected,
    /// An attempt is in flight
    Connecting,
    /// Every gating tunnel is ready
    Connected,
}

impl fmt::Display for ConnectionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionPhase::Connected => write!(f, "connected"),
            ConnectionPhase::Connecting => write!(f, "connecting"),
            ConnectionPhase::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// Snapshot of the overlay collaborator
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlayState {
    pub is_connected: bool,
    pub is_connecting: bool,
    pub proxy_address: Option<String>,
}

/// Result of one provisioning pass for a daemon port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionState {
    /// Remote port the daemon binds
    pub port: u16,
    pub binary_present: bool,
    pub daemon_running: bool,
    /// Unix millis of the last probe
    pub last_checked_at: u64,
}

/// Output of a remote command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the server never sent an exit status
    pub exit_status: Option<u32>,
}

impl CommandOutput {
    /// Successful output with the given stdout
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_status: Some(0),
        }
    }

    /// Whether the command exited with status 0
    pub fn success(&self) -> bool {
        self.exit_status == Some(0)
    }

    /// Stdout with surrounding whitespace removed
    pub fn trimmed(&self) -> &str {
        self.stdout.trim()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_of() {
        assert_eq!(port_of("127.0.0.1:17091"), Some(17091));
        assert_eq!(port_of("[::1]:22"), Some(22));
        assert_eq!(port_of("localhost"), None);
        assert_eq!(port_of("host:notaport"), None);
    }

    #[test]
    fn test_credential_debug_hides_password() {
        let cred = Credential::Password("hunter2".to_string());
        let out = format!("{:?}", cred);
        assert!(!out.contains("hunter2"));
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(format!("{}", ConnectionPhase::Connecting), "connecting");
        assert_eq!(format!("{}", TunnelPhase::Failed), "failed");
    }

    #[test]
    fn test_command_output_success() {
        assert!(CommandOutput::ok("running\n").success());
        assert_eq!(CommandOutput::ok("running\n").trimmed(), "running");
        assert!(!CommandOutput::default().success());
    }
}
