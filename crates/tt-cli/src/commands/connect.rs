//! Connect command implementation

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::broadcast::error::RecvError;

use crate::output::{format_event, format_status, print_error, print_info, print_success, print_warning};
use tt_core::config;
use tt_core::secrets::FileSecretStore;
use tt_core::tailscale::TailscaleOverlay;
use tt_orchestrator::policy::QUICK_PROBE_TIMEOUT;
use tt_orchestrator::{ConnectionOrchestrator, OrchestratorEvent, RpcShareResolver};
use tt_ssh::SshTransport;

/// Connect to `profile_name` and hold the tunnels open until interrupted
pub async fn connect_command(
    config_path: &Path,
    secrets_path: &Path,
    profile_name: &str,
    json: bool,
) -> Result<()> {
    let config = config::load_or_default(config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;
    let profile = config.profile(profile_name)?;
    let secrets = FileSecretStore::open(secrets_path)
        .with_context(|| format!("Failed to open secrets at {}", secrets_path.display()))?;

    let transport = Arc::new(SshTransport::new(profile.connect_timeout));
    let orchestrator = ConnectionOrchestrator::new(
        transport.clone(),
        Arc::new(TailscaleOverlay::new(config.overlay.clone())),
        Arc::new(secrets),
        Arc::new(RpcShareResolver::new(QUICK_PROBE_TIMEOUT)?),
        config.file_server.clone(),
    );

    let mut events = orchestrator.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) if json => {
                    if let Ok(line) = serde_json::to_string(&event) {
                        println!("{}", line);
                    }
                }
                Ok(event) => print_event(&event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!("Event printer skipped {} events", skipped)
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    if !json {
        print_info(&format!(
            "Connecting to {} ({}@{})",
            profile.name,
            profile.username,
            profile.ssh_endpoint()
        ));
    }

    if let Err(e) = orchestrator.connect(&profile).await {
        if !json {
            print_error(&format!("Connection failed: {}", e));
            println!("{}", format_status(&orchestrator.status().await));
        }
        orchestrator.disconnect().await;
        transport.close_all().await;
        printer.abort();
        return Err(e.into());
    }

    if !json {
        print_success(&format!("Connected to {}", profile.name));
        println!("{}", format_status(&orchestrator.status().await));
        print_info("Press Ctrl+C to disconnect");
    }

    wait_for_shutdown().await;

    orchestrator.disconnect().await;
    transport.close_all().await;
    printer.abort();
    if !json {
        print_success("Disconnected");
    }
    Ok(())
}

fn print_event(event: &OrchestratorEvent) {
    let Some(line) = format_event(event) else {
        return;
    };
    match event {
        OrchestratorEvent::ProvisionFailed { .. } => print_warning(&line),
        OrchestratorEvent::TunnelChanged(state) if state.last_error.is_some() => {
            print_warning(&line)
        }
        _ => print_info(&line),
    }
}

/// Resolve on Ctrl+C, or SIGTERM on unix
async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
                return;
            }
            Err(e) => tracing::warn!("Could not install SIGTERM handler: {}", e),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Could not listen for Ctrl+C: {}", e);
    }
}
