//! Secret command implementations

use std::io::BufRead;
use std::path::Path;

use anyhow::{bail, Context, Result};

use crate::output::{print_info, print_success};
use tt_core::secrets::FileSecretStore;
use tt_core::SecretStore;

/// Store a secret. Without `value` the secret is read from one line of stdin.
pub fn secret_set(secrets_path: &Path, key: &str, value: Option<String>) -> Result<()> {
    let value = match value {
        Some(value) => value,
        None => {
            print_info(&format!("Enter value for '{}':", key));
            let mut line = String::new();
            std::io::stdin()
                .lock()
                .read_line(&mut line)
                .context("Failed to read secret from stdin")?;
            line.trim_end_matches(['\r', '\n']).to_string()
        }
    };
    if value.is_empty() {
        bail!("Refusing to store an empty secret for '{}'", key);
    }

    let store = FileSecretStore::open(secrets_path)
        .with_context(|| format!("Failed to open secrets at {}", secrets_path.display()))?;
    store.set(key, &value)?;
    print_success(&format!("Stored secret '{}'", key));
    Ok(())
}

/// List stored secret keys (never values)
pub fn secret_list(secrets_path: &Path) -> Result<()> {
    let store = FileSecretStore::open(secrets_path)
        .with_context(|| format!("Failed to open secrets at {}", secrets_path.display()))?;
    let keys = store.keys();
    if keys.is_empty() {
        println!("No secrets stored");
    }
    for key in keys {
        println!("{}", key);
    }
    Ok(())
}
