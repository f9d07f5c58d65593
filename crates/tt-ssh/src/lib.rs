//! tt-ssh: SSH transport for Tether
//!
//! Implements [`tt_core::Transport`] with russh: local port forwards over
//! `direct-tcpip` channels, remote command execution, detached launches and
//! file uploads. Sessions can be dialed through a SOCKS5 proxy so they ride
//! the overlay network.

pub mod client;
pub mod exec;
pub mod forward;
mod transport;

pub use transport::SshTransport;
