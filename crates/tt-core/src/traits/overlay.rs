//! Overlay network trait

use async_trait::async_trait;

use crate::types::OverlayState;

/// A private network overlay (mesh VPN) that may expose a SOCKS5 proxy
#[async_trait]
pub trait Overlay: Send + Sync {
    /// Start connecting. No-op when already connecting or connected.
    async fn connect(&self);

    /// Tear the overlay session down
    async fn disconnect(&self);

    /// Whether the overlay currently reports connected
    async fn is_connected(&self) -> bool;

    /// Local proxy to route SSH through, if any
    fn proxy_address(&self) -> Option<String>;

    /// Snapshot of the overlay's state
    async fn state(&self) -> OverlayState {
        OverlayState {
            is_connected: self.is_connected().await,
            is_connecting: false,
            proxy_address: self.proxy_address(),
        }
    }
}
