//! Run-ledger schema and migrations.
//!
//! Only the ledger is versioned here; entity tables are created on demand
//! from the table schema metadata and never migrated.

use rusqlite::Connection;

use super::error::WarehouseError;

/// Current ledger version. Increment when changing the ledger DDL.
pub const SCHEMA_VERSION: i32 = 1;

const LEDGER_V1: &str = r#"
CREATE TABLE IF NOT EXISTS sync_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at INTEGER NOT NULL,
    completed_at INTEGER,
    entities_synced INTEGER DEFAULT 0,
    entities_deferred INTEGER DEFAULT 0,
    records_written INTEGER DEFAULT 0,
    rows_loaded INTEGER DEFAULT 0,
    interrupted INTEGER DEFAULT 0
);
"#;

pub(crate) fn get_schema_version(conn: &Connection) -> Result<i32, WarehouseError> {
    let version: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version)
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<(), WarehouseError> {
    conn.pragma_update(None, "user_version", version)?;
    Ok(())
}

/// Create or upgrade the ledger. Safe to call on every open.
pub(crate) fn migrate(conn: &Connection) -> Result<(), WarehouseError> {
    let current = get_schema_version(conn)?;

    if current > SCHEMA_VERSION {
        return Err(WarehouseError::UnsupportedSchemaVersion {
            found: current,
            expected: SCHEMA_VERSION,
        });
    }

    if current < SCHEMA_VERSION {
        conn.execute_batch(LEDGER_V1)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
        tracing::debug!("Initialized warehouse ledger at version {}", SCHEMA_VERSION);
    }

    Ok(())
}
