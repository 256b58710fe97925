use std::path::PathBuf;
use std::time::Duration;

use crate::cli::{ApiArgs, RunArgs, StorageArgs};
use crate::cosential::{Credentials, FailurePolicy};
use crate::secrets::{DirSecretStore, EnvSecretStore, SecretError, SecretStore};

/// Compass API connection settings. Holds secret names, never values.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub base_url: String,
    pub username: String,
    pub firm_id: String,
    pub password_secret: String,
    pub api_key_secret: String,
    pub secrets_dir: Option<PathBuf>,
    pub request_timeout: Option<Duration>,
}

impl ApiConfig {
    fn from_args(args: ApiArgs) -> anyhow::Result<Self> {
        if args.request_timeout == Some(0) {
            anyhow::bail!("--request-timeout must be at least 1 second");
        }
        Ok(Self {
            base_url: args.api_base_url,
            username: args.username,
            firm_id: args.firm_id,
            password_secret: args.password_secret,
            api_key_secret: args.api_key_secret,
            secrets_dir: args.secrets_dir.map(|d| expand_tilde(&d)),
            request_timeout: args.request_timeout.map(Duration::from_secs),
        })
    }

    /// Secret backend: the mounted directory when configured, else the environment.
    pub fn secret_store(&self) -> Box<dyn SecretStore> {
        match &self.secrets_dir {
            Some(dir) => Box::new(DirSecretStore::new(dir)),
            None => Box::new(EnvSecretStore),
        }
    }

    /// Read the password and API key once and pair them with the identity fields.
    pub async fn resolve_credentials(
        &self,
        store: &dyn SecretStore,
    ) -> Result<Credentials, SecretError> {
        let password = store.get_secret(&self.password_secret).await?;
        let api_key = store.get_secret(&self.api_key_secret).await?;
        Ok(Credentials {
            username: self.username.clone(),
            password,
            firm_id: self.firm_id.clone(),
            api_key,
        })
    }
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub root: PathBuf,
    pub container: String,
    pub run_tag: String,
}

impl StorageConfig {
    pub fn from_args(args: StorageArgs) -> anyhow::Result<Self> {
        let run_tag = args.run_tag.trim().to_string();
        if run_tag.is_empty() || run_tag.contains(['/', '\\']) {
            anyhow::bail!("Invalid --run-tag '{}': must be a non-empty file name fragment", args.run_tag);
        }
        Ok(Self {
            root: expand_tilde(&args.storage_root),
            container: args.container,
            run_tag,
        })
    }
}

/// Settings for the commands that talk to the API.
#[derive(Debug, Clone)]
pub struct Config {
    pub api: ApiConfig,
    pub storage: StorageConfig,
    pub warehouse: PathBuf,
    pub policy: FailurePolicy,
}

impl Config {
    pub fn from_cli(args: RunArgs) -> anyhow::Result<Self> {
        Ok(Self {
            api: ApiConfig::from_args(args.api)?,
            storage: StorageConfig::from_args(args.storage)?,
            warehouse: expand_tilde(&args.warehouse.warehouse),
            policy: args.on_error,
        })
    }
}

pub(crate) fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}
