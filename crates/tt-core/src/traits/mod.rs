//! Collaborator trait definitions

mod overlay;
mod secrets;
mod transport;

pub use overlay::Overlay;
pub use secrets::SecretStore;
pub use transport::Transport;
