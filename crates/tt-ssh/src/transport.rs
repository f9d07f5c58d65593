//! [`Transport`] implementation on top of russh

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;

use tt_core::{CommandOutput, SshTarget, Transport, TransportError};

use crate::client;
use crate::exec;
use crate::forward::{bind_local, LocalForward};

/// Upper bound for streaming a file to the remote host
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(60);

/// SSH transport. Forwards keep their own session; commands open a short-lived one.
pub struct SshTransport {
    /// TCP + handshake timeout
    connect_timeout: Duration,
    /// Running forwards keyed by local address
    forwards: DashMap<String, LocalForward>,
}

impl SshTransport {
    /// Create a transport with the given connect timeout
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            forwards: DashMap::new(),
        }
    }

    /// Local addresses with a running forward
    pub fn active_forwards(&self) -> Vec<String> {
        self.forwards
            .iter()
            .filter(|f| f.value().is_running())
            .map(|f| f.key().clone())
            .collect()
    }

    /// Stop every forward and wait for their listeners to close
    pub async fn close_all(&self) {
        let locals: Vec<String> = self.forwards.iter().map(|f| f.key().clone()).collect();
        for local in locals {
            if let Some((_, mut forward)) = self.forwards.remove(&local) {
                forward.stop().await;
            }
        }
    }
}

impl Default for SshTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs(15))
    }
}

#[async_trait]
impl Transport for SshTransport {
    async fn open_forward(
        &self,
        target: &SshTarget,
        remote: &str,
        local: &str,
    ) -> Result<(), TransportError> {
        // A previous forward on the same address is superseded
        if let Some((_, mut previous)) = self.forwards.remove(local) {
            tracing::debug!("Replacing forward on {} (was -> {})", local, previous.remote());
            previous.stop().await;
        }

        // Bind first so a busy port fails fast without an SSH round trip
        let listener = bind_local(local).await?;
        let session = client::connect(target, self.connect_timeout).await?;

        tracing::info!("Forwarding {} -> {} via {}", local, remote, target.endpoint);
        let forward = LocalForward::spawn(listener, session, remote.to_string());
        self.forwards.insert(local.to_string(), forward);
        Ok(())
    }

    async fn close_forward(&self, local: &str) -> Result<(), TransportError> {
        if let Some((_, mut forward)) = self.forwards.remove(local) {
            tracing::info!("Closing forward {} -> {}", local, forward.remote());
            forward.stop().await;
        }
        Ok(())
    }

    async fn exec(
        &self,
        target: &SshTarget,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, TransportError> {
        let session = client::connect(target, self.connect_timeout).await?;
        let result = exec::run(&session, command, timeout).await;
        client::close(&session).await;
        result
    }

    async fn exec_detached(
        &self,
        target: &SshTarget,
        command: &str,
    ) -> Result<(), TransportError> {
        let session = client::connect(target, self.connect_timeout).await?;
        let result = exec::run_detached(&session, command).await;
        client::close(&session).await;
        result
    }

    async fn upload(
        &self,
        target: &SshTarget,
        local_path: &Path,
        remote_path: &str,
    ) -> Result<(), TransportError> {
        let session = client::connect(target, self.connect_timeout).await?;
        let result = exec::upload(&session, local_path, remote_path, UPLOAD_TIMEOUT).await;
        client::close(&session).await;
        result
    }
}
