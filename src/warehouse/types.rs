//! Column specs and ledger records for the warehouse.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Column type names accepted in `Cosential_Table_Schemas.json`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    Integer,
    String,
    Float,
    DateTime,
    Text,
    Boolean,
    Decimal,
}

impl ColumnType {
    /// SQL type used in `CREATE TABLE`. `length` only applies to `String`.
    pub fn sql_type(&self, length: Option<u32>) -> String {
        match self {
            Self::Integer => "INTEGER".to_string(),
            Self::String => match length {
                Some(len) => format!("VARCHAR({len})"),
                None => "VARCHAR".to_string(),
            },
            Self::Float | Self::Decimal => "REAL".to_string(),
            Self::DateTime => "TIMESTAMP".to_string(),
            Self::Text => "TEXT".to_string(),
            Self::Boolean => "BOOLEAN".to_string(),
        }
    }
}

/// One warehouse column; `name` is also the JSON field it is read from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u32>,
}

/// Counters recorded when a sync run completes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncRunStats {
    pub entities_synced: u64,
    pub entities_deferred: u64,
    pub records_written: u64,
    pub rows_loaded: u64,
    pub interrupted: bool,
}

/// Ledger overview for the `status` command.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub total_runs: u64,
    pub interrupted_runs: u64,
    pub last_started: Option<DateTime<Utc>>,
    pub last_completed: Option<DateTime<Utc>>,
    pub last_stats: Option<SyncRunStats>,
}
