//! Tether CLI
//!
//! Brings the services behind an SSH host to local ports:
//! - `connect` opens the tunnels for a profile and holds them until Ctrl+C
//! - `status` and `profiles` inspect what is configured and forwarded
//! - `secret` and `config` manage credentials and the config file

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tether::commands;
use tt_core::{config, secrets};

#[derive(Parser)]
#[command(name = "tether")]
#[command(author, version, about = "SSH tunnel orchestrator for remote services")]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, env = "TETHER_CONFIG")]
    config: Option<PathBuf>,

    /// Path to the secrets file
    #[arg(long, global = true, env = "TETHER_SECRETS")]
    secrets: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open the tunnels for a profile and keep them up until Ctrl+C
    Connect {
        /// Profile name from the config file
        profile: String,
        /// Print orchestrator events as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Show which forwarded ports are listening
    Status {
        /// Only this profile
        profile: Option<String>,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// List configured profiles
    Profiles,

    /// Manage stored credentials
    Secret {
        #[command(subcommand)]
        action: SecretAction,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum SecretAction {
    /// Store a secret (reads stdin when no value is given)
    Set {
        /// Secret key, e.g. `seedbox.ssh`
        key: String,
        /// Secret value
        #[arg(long)]
        value: Option<String>,
    },
    /// List stored secret keys
    List,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show config file path
    Path,
    /// Show the effective configuration
    Show,
    /// Write a starter configuration
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config_path = cli.config.unwrap_or_else(config::default_config_path);
    let secrets_path = cli.secrets.unwrap_or_else(secrets::default_secrets_path);

    match cli.command {
        Commands::Connect { profile, json } => {
            commands::connect_command(&config_path, &secrets_path, &profile, json).await
        }
        Commands::Status { profile, json } => {
            commands::status_command(&config_path, profile.as_deref(), json).await
        }
        Commands::Profiles => commands::profiles_command(&config_path),
        Commands::Secret { action } => match action {
            SecretAction::Set { key, value } => commands::secret_set(&secrets_path, &key, value),
            SecretAction::List => commands::secret_list(&secrets_path),
        },
        Commands::Config { action } => match action {
            ConfigAction::Path => commands::config_path(&config_path),
            ConfigAction::Show => commands::config_show(&config_path),
            ConfigAction::Init { force } => commands::config_init(&config_path, force),
        },
    }
}
