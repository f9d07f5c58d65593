//! Profiles command implementation

use std::path::Path;

use anyhow::{Context, Result};

use crate::output::{format_profiles, print_info};
use tt_core::config;

/// List configured profiles with their forwarded ports
pub fn profiles_command(config_path: &Path) -> Result<()> {
    let config = config::load_or_default(config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;

    println!("{}", format_profiles(&config));
    if config.profiles.is_empty() {
        print_info("Run 'tether config init' to create a starter configuration");
    }
    Ok(())
}
