//! Secret storage trait

use crate::error::SecretError;

/// Key/value store for credentials
pub trait SecretStore: Send + Sync {
    /// Read a secret
    fn get(&self, key: &str) -> Option<String>;

    /// Write a secret, replacing any previous value
    fn set(&self, key: &str, value: &str) -> Result<(), SecretError>;
}
