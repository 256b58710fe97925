use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};

use crate::cosential::FailurePolicy;
use crate::types::LogLevel;

#[derive(Parser, Debug)]
#[command(
    name = "cosential-sync",
    about = "Incrementally sync Cosential CRM entities into a warehouse"
)]
pub struct Cli {
    /// Log level (overridden by RUST_LOG)
    #[arg(long, value_enum, default_value = "info", global = true)]
    pub log_level: LogLevel,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Extract changed records, load them and advance the checkpoint
    Sync(RunArgs),

    /// Stage changed records without loading or advancing the checkpoint
    Extract(RunArgs),

    /// Load staged records into the warehouse
    Load(LoadArgs),

    /// Probe every entity's latest version and write the checkpoint
    RefreshVersions(RunArgs),

    /// Show the sync run ledger
    Status(StatusArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ApiArgs {
    /// Compass API base URL
    #[arg(
        long,
        env = "COSENTIAL_API_URL",
        default_value = "https://compass.cosential.com/"
    )]
    pub api_base_url: String,

    /// API user name
    #[arg(long, env = "COSENTIAL_USER")]
    pub username: String,

    /// Firm id sent as x-compass-firm-id
    #[arg(long, env = "COSENTIAL_FIRM_ID")]
    pub firm_id: String,

    /// Name of the secret holding the API password
    #[arg(long, env = "COSENTIAL_PW_SECRET")]
    pub password_secret: String,

    /// Name of the secret holding the API key
    #[arg(long, env = "COSENTIAL_APIKEY_SECRET")]
    pub api_key_secret: String,

    /// Directory with one file per secret (default: read secrets from the environment)
    #[arg(long, env = "SECRETS_DIR")]
    pub secrets_dir: Option<String>,

    /// Per-request timeout in seconds
    #[arg(long)]
    pub request_timeout: Option<u64>,
}

#[derive(Args, Debug, Clone)]
pub struct StorageArgs {
    /// Root directory for staged blobs
    #[arg(long, env = "STORAGE_ROOT", default_value = "~/.cosential-sync/storage")]
    pub storage_root: String,

    /// Container holding metadata and staged records
    #[arg(long, env = "BLOB_CONTAINER")]
    pub container: String,

    /// Tag naming this run's records file (run={tag}.json)
    #[arg(long, default_value = "temp")]
    pub run_tag: String,
}

#[derive(Args, Debug, Clone)]
pub struct WarehouseArgs {
    /// Path to the warehouse database
    #[arg(long, env = "WAREHOUSE_DB", default_value = "~/.cosential-sync/warehouse.db")]
    pub warehouse: String,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub api: ApiArgs,

    #[command(flatten)]
    pub storage: StorageArgs,

    #[command(flatten)]
    pub warehouse: WarehouseArgs,

    /// What to do when an API call fails
    #[arg(long, value_enum, default_value = "skip")]
    pub on_error: FailurePolicy,
}

#[derive(Args, Debug)]
pub struct LoadArgs {
    #[command(flatten)]
    pub storage: StorageArgs,

    #[command(flatten)]
    pub warehouse: WarehouseArgs,

    /// Partition date to load (default: today)
    #[arg(long)]
    pub date: Option<NaiveDate>,

    /// What to do when an entity fails to load
    #[arg(long, value_enum, default_value = "skip")]
    pub on_error: FailurePolicy,
}

#[derive(Args, Debug)]
pub struct StatusArgs {
    #[command(flatten)]
    pub warehouse: WarehouseArgs,
}
