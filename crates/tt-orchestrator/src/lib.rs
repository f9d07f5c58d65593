//! Tether connection orchestrator
//!
//! Brings a remote host's services to local ports:
//! - Waits for the overlay network when a profile requires it
//! - Opens one SSH local forward per service, concurrently
//! - Installs and starts the file-server daemon on the remote host
//! - Declares the connection ready only once every forward accepts connections

pub mod driver;
pub mod events;
pub mod orchestrator;
pub mod overlay;
pub mod plan;
pub mod policy;
pub mod probe;
pub mod provision;
pub mod registry;
pub mod share;

pub use driver::TunnelDriver;
pub use events::{ConnectionStatus, OrchestratorEvent};
pub use orchestrator::ConnectionOrchestrator;
pub use overlay::OverlayGate;
pub use plan::ConnectionPlan;
pub use policy::{PortPlan, TimingPolicy};
pub use probe::LivenessProbe;
pub use provision::RemoteProvisioner;
pub use registry::TunnelRegistry;
pub use share::{RpcAuth, RpcShareResolver, ShareError, ShareResolver, StaticShareResolver};
