//! Observer interface: events and status snapshots

use serde::Serialize;

use tt_core::{ConnectionPhase, ProvisionState, TunnelState};

/// Something observable changed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OrchestratorEvent {
    /// The overall phase changed
    PhaseChanged {
        phase: ConnectionPhase,
        error: Option<String>,
    },
    /// One tunnel's state changed
    TunnelChanged(TunnelState),
    /// A provisioning pass finished
    Provisioned(ProvisionState),
    /// A provisioning pass failed (the connection carries on)
    ProvisionFailed { error: String },
}

/// Point-in-time view of the orchestrator
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionStatus {
    pub phase: ConnectionPhase,
    /// Profile of the current or last attempt
    pub profile: Option<String>,
    pub last_error: Option<String>,
    pub tunnels: Vec<TunnelState>,
    /// Outcome of the last successful provisioning pass
    pub provision: Option<ProvisionState>,
}

impl ConnectionStatus {
    /// Whether every gating tunnel was ready at the last check
    pub fn is_connected(&self) -> bool {
        self.phase == ConnectionPhase::Connected
    }
}
