//! Terminal output: tables for tunnels and profiles, colored status lines

use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};
use tabled::{settings::Style, Table, Tabled};

use tt_core::config::{ConfigFile, OverlayMode};
use tt_core::time::format_age;
use tt_core::{TunnelPhase, TunnelState};
use tt_orchestrator::{ConnectionStatus, OrchestratorEvent, PortPlan};

/// Format tunnel states as a table
pub fn format_tunnels(tunnels: &[TunnelState]) -> String {
    if tunnels.is_empty() {
        return "No tunnels".to_string();
    }

    #[derive(Tabled)]
    struct TunnelRow {
        #[tabled(rename = "TUNNEL")]
        id: String,
        #[tabled(rename = "STATE")]
        phase: String,
        #[tabled(rename = "LOCAL")]
        local: String,
        #[tabled(rename = "ERROR")]
        error: String,
    }

    let rows: Vec<TunnelRow> = tunnels
        .iter()
        .map(|t| TunnelRow {
            id: t.id.to_string(),
            phase: t.phase.to_string(),
            local: t
                .local_port
                .map(|p| format!("127.0.0.1:{}", p))
                .unwrap_or_else(|| "-".to_string()),
            error: t
                .last_error
                .as_deref()
                .map(|e| truncate(e, 48))
                .unwrap_or_else(|| "-".to_string()),
        })
        .collect();

    Table::new(rows).with(Style::rounded()).to_string()
}

/// Format every configured profile as a table
pub fn format_profiles(config: &ConfigFile) -> String {
    if config.profiles.is_empty() {
        return "No profiles configured".to_string();
    }

    #[derive(Tabled)]
    struct ProfileRow {
        #[tabled(rename = "NAME")]
        name: String,
        #[tabled(rename = "SSH")]
        ssh: String,
        #[tabled(rename = "OVERLAY")]
        overlay: String,
        #[tabled(rename = "CONTROL")]
        control: String,
        #[tabled(rename = "FILES")]
        files: String,
    }

    let rows: Vec<ProfileRow> = config
        .profiles
        .iter()
        .map(|(name, p)| {
            let ports = PortPlan::for_control_port(p.control_port);
            ProfileRow {
                name: name.clone(),
                ssh: format!("{}@{}", p.username, p.ssh_endpoint()),
                overlay: overlay_label(p.overlay).to_string(),
                control: match ports {
                    Some(ports) => format!("{} -> :{}", ports.local_control, p.control_port),
                    None => "invalid port".to_string(),
                },
                files: match (p.file_server, ports) {
                    (true, Some(ports)) => {
                        format!("{} -> :{}", ports.local_daemon, ports.remote_daemon)
                    }
                    _ => "-".to_string(),
                },
            }
        })
        .collect();

    Table::new(rows).with(Style::rounded()).to_string()
}

/// Format an orchestrator snapshot
pub fn format_status(status: &ConnectionStatus) -> String {
    let mut output = format!(
        "Connection: {}{}\n",
        status.phase,
        status
            .profile
            .as_deref()
            .map(|p| format!(" ({})", p))
            .unwrap_or_default()
    );
    if let Some(error) = &status.last_error {
        output.push_str(&format!("Last error: {}\n", error));
    }
    if let Some(provision) = &status.provision {
        output.push_str(&format!(
            "File server: remote port {} {} (checked {})\n",
            provision.port,
            if provision.daemon_running {
                "running"
            } else {
                "not responding"
            },
            format_age(provision.last_checked_at)
        ));
    }
    output.push_str(&format_tunnels(&status.tunnels));
    output
}

/// One human-readable line per event, `None` for events not worth showing
pub fn format_event(event: &OrchestratorEvent) -> Option<String> {
    match event {
        OrchestratorEvent::PhaseChanged { .. } => None,
        OrchestratorEvent::TunnelChanged(state) => match state.phase {
            TunnelPhase::Active => Some(format!(
                "Tunnel {} listening on 127.0.0.1:{}",
                state.id,
                state.local_port.unwrap_or_default()
            )),
            TunnelPhase::Failed => Some(format!(
                "Tunnel {} failed: {}",
                state.id,
                state.last_error.as_deref().unwrap_or("unknown error")
            )),
            _ => None,
        },
        OrchestratorEvent::Provisioned(state) => Some(format!(
            "File server on remote port {} {}",
            state.port,
            if state.daemon_running {
                "is running"
            } else {
                "was launched but is not listening yet"
            }
        )),
        OrchestratorEvent::ProvisionFailed { error } => {
            Some(format!("File server provisioning failed: {}", error))
        }
    }
}

fn overlay_label(mode: OverlayMode) -> &'static str {
    match mode {
        OverlayMode::Required => "required",
        OverlayMode::Disabled => "disabled",
        OverlayMode::Unmanaged => "-",
    }
}

/// Truncate a string with ellipsis if too long
fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

fn print_tagged(mut out: impl std::io::Write, color: Color, tag: &str, msg: &str) {
    let _ = crossterm::execute!(
        out,
        SetForegroundColor(color),
        Print(tag),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Green check on stdout
pub fn print_success(msg: &str) {
    print_tagged(std::io::stdout(), Color::Green, "✓ ", msg);
}

/// Red cross on stderr
pub fn print_error(msg: &str) {
    print_tagged(std::io::stderr(), Color::Red, "✗ ", msg);
}

/// Yellow warning on stderr
pub fn print_warning(msg: &str) {
    print_tagged(std::io::stderr(), Color::Yellow, "⚠ ", msg);
}

/// Cyan info on stdout
pub fn print_info(msg: &str) {
    print_tagged(std::io::stdout(), Color::Cyan, "ℹ ", msg);
}
