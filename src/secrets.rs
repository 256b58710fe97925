//! Secret lookup for API credentials.
//!
//! Secrets are read once at startup. `DirSecretStore` reads one file per
//! secret from a mounted directory (the layout used by vault CSI drivers and
//! container secret mounts); `EnvSecretStore` reads an environment variable
//! of the same name.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SecretError {
    #[error("Secret '{0}' not found")]
    NotFound(String),

    #[error("Secret '{0}' is empty")]
    Empty(String),

    #[error("Invalid secret name '{0}'")]
    InvalidName(String),

    #[error("Failed to read secret '{name}': {source}")]
    Unreadable {
        name: String,
        source: std::io::Error,
    },
}

#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Fetch the value of secret `name`. Fails when it is absent or unreadable.
    async fn get_secret(&self, name: &str) -> Result<String, SecretError>;
}

fn validate_name(name: &str) -> Result<(), SecretError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && !name.starts_with('.');
    if valid {
        Ok(())
    } else {
        Err(SecretError::InvalidName(name.to_string()))
    }
}

fn non_empty(name: &str, value: String) -> Result<String, SecretError> {
    if value.is_empty() {
        Err(SecretError::Empty(name.to_string()))
    } else {
        Ok(value)
    }
}

#[derive(Debug, Clone)]
pub struct DirSecretStore {
    dir: PathBuf,
}

impl DirSecretStore {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }
}

#[async_trait]
impl SecretStore for DirSecretStore {
    async fn get_secret(&self, name: &str) -> Result<String, SecretError> {
        validate_name(name)?;
        let path = self.dir.join(name);
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => {
                tracing::debug!(secret = name, "Loaded secret from {}", self.dir.display());
                non_empty(name, contents.trim_end_matches(['\r', '\n']).to_string())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(SecretError::NotFound(name.to_string()))
            }
            Err(source) => Err(SecretError::Unreadable {
                name: name.to_string(),
                source,
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EnvSecretStore;

#[async_trait]
impl SecretStore for EnvSecretStore {
    async fn get_secret(&self, name: &str) -> Result<String, SecretError> {
        validate_name(name)?;
        match std::env::var(name) {
            Ok(value) => non_empty(name, value),
            Err(_) => Err(SecretError::NotFound(name.to_string())),
        }
    }
}
