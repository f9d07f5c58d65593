//! SSH transport trait

use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

use crate::error::TransportError;
use crate::types::{CommandOutput, SshTarget};

/// Abstraction over the SSH transport.
///
/// Every call carries the full [`SshTarget`]; implementations decide whether
/// to reuse sessions.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Listen on `local` and forward every accepted connection to `remote`
    /// (as seen from the SSH server). Returns once the listener is bound and
    /// the session is authenticated; the remote side may still be closed.
    async fn open_forward(
        &self,
        target: &SshTarget,
        remote: &str,
        local: &str,
    ) -> Result<(), TransportError>;

    /// Stop the forward listening on `local`. Unknown addresses are ignored.
    async fn close_forward(&self, local: &str) -> Result<(), TransportError>;

    /// Run `command` and collect its output
    async fn exec(
        &self,
        target: &SshTarget,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, TransportError>;

    /// Start `command` without waiting for it to finish
    async fn exec_detached(&self, target: &SshTarget, command: &str)
        -> Result<(), TransportError>;

    /// Copy a local file to `remote_path`
    async fn upload(
        &self,
        target: &SshTarget,
        local_path: &Path,
        remote_path: &str,
    ) -> Result<(), TransportError>;
}
