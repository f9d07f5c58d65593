//! Tailscale overlay
//!
//! Drives the local `tailscale` CLI: `up` to connect, `down` to disconnect
//! and `status --json` to learn whether the tailnet is reachable. SSH can be
//! routed through the SOCKS5 proxy of a userspace `tailscaled`.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;

use crate::config::OverlayConfig;
use crate::traits::Overlay;
use crate::types::OverlayState;

/// Information about the local Tailscale node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TailscaleInfo {
    /// Device name (e.g., "adams-macbook")
    pub device_name: String,
    /// Tailnet DNS suffix (e.g., "tail1234.ts.net")
    pub tailnet: String,
    /// Tailscale IPv4 address when available
    pub ip: String,
    /// Backend state reported by tailscaled ("Running", "NeedsLogin", ...)
    pub backend_state: String,
}

impl TailscaleInfo {
    /// Whether the node is up and logged in
    pub fn is_running(&self) -> bool {
        self.backend_state == "Running"
    }
}

/// Status response from `tailscale status --json`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TailscaleStatus {
    backend_state: String,
    #[serde(rename = "Self")]
    self_node: Option<SelfNode>,
    current_tailnet: Option<CurrentTailnet>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SelfNode {
    #[serde(rename = "DNSName")]
    dns_name: String,
    #[serde(rename = "TailscaleIPs", default)]
    tailscale_ips: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CurrentTailnet {
    #[serde(rename = "MagicDNSSuffix")]
    magic_dns_suffix: String,
}

/// Parse `tailscale status --json` output
pub fn parse_status(json: &[u8]) -> Result<TailscaleInfo, serde_json::Error> {
    let status: TailscaleStatus = serde_json::from_slice(json)?;

    let (device_name, ip) = match status.self_node {
        Some(node) => {
            // "adams-macbook.tail1234.ts.net." -> "adams-macbook"
            let dns_name = node.dns_name.trim_end_matches('.');
            let device = dns_name.split('.').next().unwrap_or(dns_name).to_string();
            let ip = node
                .tailscale_ips
                .iter()
                .find(|ip| !ip.contains(':'))
                .or(node.tailscale_ips.first())
                .cloned()
                .unwrap_or_default();
            (device, ip)
        }
        None => (String::new(), String::new()),
    };

    Ok(TailscaleInfo {
        device_name,
        tailnet: status
            .current_tailnet
            .map(|t| t.magic_dns_suffix)
            .unwrap_or_default(),
        ip,
        backend_state: status.backend_state,
    })
}

/// Overlay backed by the `tailscale` CLI
pub struct TailscaleOverlay {
    config: OverlayConfig,
    connecting: Arc<AtomicBool>,
}

impl TailscaleOverlay {
    /// Create an overlay driver from config
    pub fn new(config: OverlayConfig) -> Self {
        Self {
            config,
            connecting: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Query `tailscale status --json`. `None` when the CLI is missing or fails.
    pub async fn info(&self) -> Option<TailscaleInfo> {
        let output = Command::new(&self.config.cli)
            .args(["status", "--json"])
            .stdin(Stdio::null())
            .output()
            .await;

        let output = match output {
            Ok(output) => output,
            Err(e) => {
                tracing::debug!("Failed to run {} status: {}", self.config.cli, e);
                return None;
            }
        };

        // `status` exits non-zero when stopped but still prints JSON
        match parse_status(&output.stdout) {
            Ok(info) => Some(info),
            Err(e) => {
                tracing::debug!(
                    "Unparseable tailscale status ({}): {}",
                    e,
                    String::from_utf8_lossy(&output.stderr).trim()
                );
                None
            }
        }
    }
}

/// Pull a login URL out of `tailscale up` output
fn find_auth_url(output: &str) -> Option<&str> {
    output.lines().find_map(|line| {
        let start = line.find("https://login.tailscale.com/")?;
        line[start..].split_whitespace().next()
    })
}

#[async_trait]
impl Overlay for TailscaleOverlay {
    async fn connect(&self) {
        if self.is_connected().await {
            return;
        }
        if self.connecting.swap(true, Ordering::SeqCst) {
            tracing::debug!("Tailscale connect already in progress");
            return;
        }

        tracing::info!("Bringing Tailscale up");
        let cli = self.config.cli.clone();
        let connecting = Arc::clone(&self.connecting);

        // `tailscale up` blocks until login completes; the gate polls status instead
        tokio::spawn(async move {
            let result = Command::new(&cli)
                .arg("up")
                .stdin(Stdio::null())
                .output()
                .await;

            match result {
                Ok(output) => {
                    let combined = format!(
                        "{}{}",
                        String::from_utf8_lossy(&output.stdout),
                        String::from_utf8_lossy(&output.stderr)
                    );
                    if let Some(url) = find_auth_url(&combined) {
                        tracing::warn!("Tailscale needs login: {}", url);
                    } else if !output.status.success() {
                        tracing::warn!("tailscale up failed: {}", combined.trim());
                    }
                }
                Err(e) => tracing::warn!("Failed to run {} up: {}", cli, e),
            }

            connecting.store(false, Ordering::SeqCst);
        });
    }

    async fn disconnect(&self) {
        tracing::info!("Taking Tailscale down");
        match Command::new(&self.config.cli)
            .arg("down")
            .stdin(Stdio::null())
            .output()
            .await
        {
            Ok(output) if !output.status.success() => {
                tracing::warn!(
                    "tailscale down failed: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                );
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("Failed to run {} down: {}", self.config.cli, e),
        }
    }

    async fn is_connected(&self) -> bool {
        self.info().await.map(|i| i.is_running()).unwrap_or(false)
    }

    fn proxy_address(&self) -> Option<String> {
        self.config.socks5_proxy.clone()
    }

    async fn state(&self) -> OverlayState {
        OverlayState {
            is_connected: self.is_connected().await,
            is_connecting: self.connecting.load(Ordering::SeqCst),
            proxy_address: self.proxy_address(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_running_status() {
        let json = br#"{
            "BackendState": "Running",
            "Self": {
                "DNSName": "adams-macbook.tail1234.ts.net.",
                "TailscaleIPs": ["fd7a:115c:a1e0::1", "100.64.1.50"]
            },
            "CurrentTailnet": {"Name": "adam@example.com", "MagicDNSSuffix": "tail1234.ts.net"},
            "Peer": null
        }"#;

        let info = parse_status(json).unwrap();
        assert!(info.is_running());
        assert_eq!(info.device_name, "adams-macbook");
        assert_eq!(info.ip, "100.64.1.50");
        assert_eq!(info.tailnet, "tail1234.ts.net");
    }

    #[test]
    fn test_parse_stopped_status() {
        let info = parse_status(br#"{"BackendState": "Stopped", "Self": null}"#).unwrap();
        assert!(!info.is_running());
        assert!(info.device_name.is_empty());
    }

    #[test]
    fn test_find_auth_url() {
        let out = "\nTo authenticate, visit:\n\n\thttps://login.tailscale.com/a/abc123\n\n";
        assert_eq!(
            find_auth_url(out),
            Some("https://login.tailscale.com/a/abc123")
        );
        assert_eq!(find_auth_url("Success."), None);
    }

    #[tokio::test]
    async fn test_missing_cli_is_not_connected() {
        let overlay = TailscaleOverlay::new(OverlayConfig {
            cli: "/nonexistent/tailscale".to_string(),
            socks5_proxy: Some("127.0.0.1:1055".to_string()),
        });
        assert!(!overlay.is_connected().await);
        assert_eq!(overlay.proxy_address().as_deref(), Some("127.0.0.1:1055"));
    }
}
