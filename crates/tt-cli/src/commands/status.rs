//! Status command implementation
//!
//! Tunnels live inside the `tether connect` process, so status is read from
//! the outside: each profile's derived local ports are probed.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::json;
use tabled::{settings::Style, Table, Tabled};

use tt_core::config;
use tt_orchestrator::{LivenessProbe, PortPlan};

/// Probe every profile's forwarded ports (or just `profile`)
pub async fn status_command(config_path: &Path, profile: Option<&str>, json_output: bool) -> Result<()> {
    let config = config::load_or_default(config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;
    let probe = LivenessProbe::new(Duration::from_millis(300));

    if let Some(name) = profile {
        // Fail early on a typo
        config.profile(name)?;
    }

    #[derive(Tabled)]
    struct StatusRow {
        #[tabled(rename = "PROFILE")]
        name: String,
        #[tabled(rename = "CONTROL")]
        control: String,
        #[tabled(rename = "FILES")]
        files: String,
    }

    let mut rows = Vec::new();
    let mut records = Vec::new();
    for (name, p) in &config.profiles {
        if profile.is_some_and(|wanted| wanted != name) {
            continue;
        }
        let Some(ports) = PortPlan::for_control_port(p.control_port) else {
            continue;
        };

        let control_up = probe.check(ports.local_control).await;
        let files_up = if p.file_server {
            Some(probe.check(ports.local_daemon).await)
        } else {
            None
        };

        records.push(json!({
            "profile": name,
            "control": { "port": ports.local_control, "listening": control_up },
            "files": files_up.map(|up| json!({ "port": ports.local_daemon, "listening": up })),
        }));
        rows.push(StatusRow {
            name: name.clone(),
            control: port_label(ports.local_control, control_up),
            files: files_up
                .map(|up| port_label(ports.local_daemon, up))
                .unwrap_or_else(|| "-".to_string()),
        });
    }

    if json_output {
        println!("{}", serde_json::to_string_pretty(&records)?);
    } else if rows.is_empty() {
        println!("No profiles configured");
    } else {
        println!("{}", Table::new(rows).with(Style::rounded()));
    }
    Ok(())
}

fn port_label(port: u16, listening: bool) -> String {
    format!("{} {}", port, if listening { "up" } else { "down" })
}
