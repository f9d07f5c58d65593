//! Overlay gate
//!
//! Nothing is dialed until the overlay reports connected, when the profile
//! requires it.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use tt_core::{Overlay, OverlayError};

/// Waits for the overlay before any tunnel is attempted
pub struct OverlayGate {
    overlay: Arc<dyn Overlay>,
    poll_interval: Duration,
}

impl OverlayGate {
    /// Create a gate polling every `poll_interval`
    pub fn new(overlay: Arc<dyn Overlay>, poll_interval: Duration) -> Self {
        Self {
            overlay,
            poll_interval,
        }
    }

    /// Bring the overlay up if `required` and wait until it reports connected
    pub async fn ensure_ready(&self, required: bool, limit: Duration) -> Result<(), OverlayError> {
        if !required {
            return Ok(());
        }

        if self.overlay.is_connected().await {
            tracing::debug!("Overlay already connected");
            return Ok(());
        }

        tracing::info!("Waiting up to {:?} for the overlay to connect", limit);
        self.overlay.connect().await;

        let deadline = Instant::now() + limit;
        loop {
            if self.overlay.is_connected().await {
                tracing::info!("Overlay connected");
                return Ok(());
            }
            if Instant::now() >= deadline {
                let state = self.overlay.state().await;
                tracing::warn!(
                    "Overlay did not connect within {:?} (still connecting: {})",
                    limit,
                    state.is_connecting
                );
                return Err(OverlayError::Timeout(limit));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Disconnect the overlay (profiles that explicitly disable it)
    pub async fn release(&self) {
        tracing::info!("Disconnecting overlay");
        self.overlay.disconnect().await;
    }
}
