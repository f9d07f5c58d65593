//! Config command implementations

use std::path::Path;

use anyhow::{Context, Result};

use crate::output::{print_info, print_success, print_warning};
use tt_core::config::{self, ConfigFile, OverlayMode, TargetProfile};

/// Print the config file location
pub fn config_path(config_path: &Path) -> Result<()> {
    println!("{}", config_path.display());
    Ok(())
}

/// Print the effective configuration (defaults filled in)
pub fn config_show(config_path: &Path) -> Result<()> {
    if !config_path.exists() {
        print_info(&format!(
            "{} does not exist, showing defaults",
            config_path.display()
        ));
    }
    let config = config::load_or_default(config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

/// Write a starter configuration with one example profile
pub fn config_init(config_path: &Path, force: bool) -> Result<()> {
    if config_path.exists() && !force {
        print_warning(&format!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        ));
        return Ok(());
    }

    let mut example = TargetProfile::new("seedbox.example.com");
    example.overlay = OverlayMode::Unmanaged;
    example.file_server = true;
    example.share_path = Some("~/downloads".to_string());

    let mut starter = ConfigFile::default();
    starter.profiles.insert("example".to_string(), example);

    config::save_config(config_path, &starter)
        .with_context(|| format!("Failed to write {}", config_path.display()))?;
    print_success(&format!("Wrote {}", config_path.display()));
    print_info("Store the SSH password with: tether secret set example.ssh");
    Ok(())
}
