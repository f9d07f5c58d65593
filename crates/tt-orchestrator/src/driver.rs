//! Tunnel driver
//!
//! Opens and closes one SSH-forwarded port. No retries: the orchestrator
//! decides what a failure means.

use std::sync::Arc;

use tt_core::{Overlay, SshTarget, Transport, TransportError, TunnelSpec};

/// Opens forwards through the transport, routing via the overlay when asked
pub struct TunnelDriver {
    transport: Arc<dyn Transport>,
    overlay: Arc<dyn Overlay>,
}

impl TunnelDriver {
    /// Create a driver
    pub fn new(transport: Arc<dyn Transport>, overlay: Arc<dyn Overlay>) -> Self {
        Self { transport, overlay }
    }

    /// Open the forward described by `spec` and return its local port
    pub async fn open(&self, spec: &TunnelSpec) -> Result<u16, TransportError> {
        let local_port = spec.local_port().ok_or_else(|| {
            TransportError::Io(format!("invalid local address {}", spec.local_address))
        })?;

        let target = self.resolve_target(spec).await?;

        tracing::debug!(
            "Opening tunnel {}: {} -> {}{}",
            spec.id,
            spec.local_address,
            spec.remote_address,
            target
                .proxy
                .as_deref()
                .map(|p| format!(" (via {})", p))
                .unwrap_or_default()
        );

        self.transport
            .open_forward(&target, &spec.remote_address, &spec.local_address)
            .await?;

        Ok(local_port)
    }

    /// Close the forward for `spec`. Best effort.
    pub async fn close(&self, spec: &TunnelSpec) {
        if let Err(e) = self.transport.close_forward(&spec.local_address).await {
            tracing::debug!("Closing tunnel {} failed: {}", spec.id, e);
        }
    }

    /// Attach the overlay proxy to the target, or fail if the overlay is needed and down
    pub(crate) async fn resolve_target(&self, spec: &TunnelSpec) -> Result<SshTarget, TransportError> {
        if !spec.use_overlay {
            return Ok(spec.target.clone());
        }
        if !self.overlay.is_connected().await {
            return Err(TransportError::OverlayUnavailable);
        }
        Ok(spec.target.clone().with_proxy(self.overlay.proxy_address()))
    }
}
