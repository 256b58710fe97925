//! Error types for the warehouse module.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WarehouseError {
    /// Failed to open or create the database file.
    #[error("Failed to open warehouse at {path}: {source}")]
    Open {
        path: PathBuf,
        source: rusqlite::Error,
    },

    #[error("Failed to create warehouse directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to run a ledger migration.
    #[error("Warehouse migration failed: {0}")]
    Migration(#[from] rusqlite::Error),

    /// A statement failed.
    #[error("Warehouse query failed: {0}")]
    Query(String),

    #[error("Invalid identifier '{0}'")]
    InvalidIdentifier(String),

    #[error("Table {table} needs at least one column")]
    NoColumns { table: String },

    #[error("Row {row} for table {table} has {found} values, expected {expected}")]
    RowWidth {
        table: String,
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("Failed to spawn blocking task: {0}")]
    Spawn(#[from] tokio::task::JoinError),

    #[error("Warehouse ledger version {found} is newer than supported version {expected}")]
    UnsupportedSchemaVersion { found: i32, expected: i32 },
}

impl WarehouseError {
    pub fn query(source: rusqlite::Error) -> Self {
        Self::Query(source.to_string())
    }
}
