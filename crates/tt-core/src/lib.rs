//! tt-core: Core abstractions and configuration for Tether
//!
//! Shared types, error enums, configuration structures and the traits of the
//! collaborators the orchestrator drives (SSH transport, overlay network,
//! secret store), plus the stock Tailscale overlay and secret stores.

pub mod config;
pub mod error;
pub mod secrets;
pub mod tailscale;
pub mod time;
pub mod traits;
pub mod types;

pub use error::{
    ConfigError, OrchestratorError, OverlayError, ProvisionError, SecretError,
    TransportError,
};
pub use traits::{Overlay, SecretStore, Transport};
pub use types::{
    CommandOutput, ConnectionPhase, Credential, OverlayState, ProvisionState, SshTarget,
    TunnelId, TunnelPhase, TunnelSpec, TunnelState,
};
