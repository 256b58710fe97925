//! Warehouse trait and SQLite implementation.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OptionalExtension};
use serde_json::Value;

use super::error::WarehouseError;
use super::schema;
use super::types::{ColumnSpec, RunSummary, SyncRunStats};

/// Relational store for flattened entity rows plus the sync run ledger.
///
/// Object-safe so the pipeline can hold `&dyn Warehouse`.
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Create `table` with `columns` unless it already exists. Existing
    /// tables are left untouched (no migration). Returns true if created.
    async fn ensure_table(&self, table: &str, columns: &[ColumnSpec])
        -> Result<bool, WarehouseError>;

    /// Insert positional rows, each matching `columns` order, in one transaction.
    async fn insert_rows(
        &self,
        table: &str,
        columns: &[ColumnSpec],
        rows: &[Vec<Value>],
    ) -> Result<u64, WarehouseError>;

    /// Start a new sync run and return its ID.
    async fn start_sync_run(&self) -> Result<i64, WarehouseError>;

    /// Complete a sync run with statistics.
    async fn complete_sync_run(
        &self,
        run_id: i64,
        stats: &SyncRunStats,
    ) -> Result<(), WarehouseError>;

    /// Summarize the run ledger.
    async fn get_summary(&self) -> Result<RunSummary, WarehouseError>;
}

pub struct SqliteWarehouse {
    /// Wrapped in Mutex because rusqlite::Connection is not Sync.
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl std::fmt::Debug for SqliteWarehouse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteWarehouse")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SqliteWarehouse {
    /// Open or create a warehouse database at the given path.
    pub async fn open(path: &Path) -> Result<Self, WarehouseError> {
        let path = path.to_path_buf();
        let path_clone = path.clone();

        let conn = tokio::task::spawn_blocking(move || {
            if let Some(parent) = path_clone.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|source| {
                        WarehouseError::CreateDir {
                            path: parent.to_path_buf(),
                            source,
                        }
                    })?;
                }
            }

            let conn = Connection::open(&path_clone).map_err(|e| WarehouseError::Open {
                path: path_clone.clone(),
                source: e,
            })?;

            conn.pragma_update(None, "journal_mode", "WAL")
                .map_err(WarehouseError::Migration)?;
            conn.pragma_update(None, "synchronous", "NORMAL")
                .map_err(WarehouseError::Migration)?;

            schema::migrate(&conn)?;

            Ok::<_, WarehouseError>(conn)
        })
        .await??;

        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    /// Open an in-memory warehouse (for testing).
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, WarehouseError> {
        let conn = Connection::open_in_memory().map_err(|e| WarehouseError::Open {
            path: PathBuf::from(":memory:"),
            source: e,
        })?;
        schema::migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: PathBuf::from(":memory:"),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, WarehouseError> {
        self.conn
            .lock()
            .map_err(|e| WarehouseError::Query(e.to_string()))
    }

    /// Run a read-only query against the warehouse (for testing).
    #[cfg(test)]
    pub(crate) fn query_rows(&self, sql: &str) -> Vec<Vec<SqlValue>> {
        let conn = self.lock().unwrap();
        let mut stmt = conn.prepare(sql).unwrap();
        let width = stmt.column_count();
        stmt.query_map([], |row| {
            (0..width)
                .map(|i| row.get::<_, SqlValue>(i))
                .collect::<Result<Vec<_>, _>>()
        })
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap()
    }
}

/// Double-quote an identifier, doubling embedded quotes.
fn quote_ident(name: &str) -> Result<String, WarehouseError> {
    if name.trim().is_empty() || name.contains('\0') {
        return Err(WarehouseError::InvalidIdentifier(name.to_string()));
    }
    Ok(format!("\"{}\"", name.replace('"', "\"\"")))
}

/// Map a JSON value onto an SQLite value. Nested objects and arrays are
/// stored as their JSON text.
fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => n.as_f64().map_or(SqlValue::Null, SqlValue::Real),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn create_table_sql(table: &str, columns: &[ColumnSpec]) -> Result<String, WarehouseError> {
    if columns.is_empty() {
        return Err(WarehouseError::NoColumns {
            table: table.to_string(),
        });
    }
    let defs = columns
        .iter()
        .map(|c| -> Result<String, WarehouseError> {
            Ok(format!(
                "{} {}",
                quote_ident(&c.name)?,
                c.column_type.sql_type(c.length)
            ))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quote_ident(table)?,
        defs.join(", ")
    ))
}

fn insert_sql(table: &str, columns: &[ColumnSpec]) -> Result<String, WarehouseError> {
    if columns.is_empty() {
        return Err(WarehouseError::NoColumns {
            table: table.to_string(),
        });
    }
    let names = columns
        .iter()
        .map(|c| quote_ident(&c.name))
        .collect::<Result<Vec<_>, _>>()?;
    let placeholders = (1..=columns.len())
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>();
    Ok(format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(table)?,
        names.join(", "),
        placeholders.join(", ")
    ))
}

#[async_trait]
impl Warehouse for SqliteWarehouse {
    async fn ensure_table(
        &self,
        table: &str,
        columns: &[ColumnSpec],
    ) -> Result<bool, WarehouseError> {
        let ddl = create_table_sql(table, columns)?;
        let conn = self.lock()?;

        let exists = conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [table],
                |_| Ok(()),
            )
            .optional()
            .map_err(WarehouseError::query)?
            .is_some();
        if exists {
            return Ok(false);
        }

        conn.execute_batch(&ddl).map_err(WarehouseError::query)?;
        tracing::info!(table, columns = columns.len(), "Created warehouse table");
        Ok(true)
    }

    async fn insert_rows(
        &self,
        table: &str,
        columns: &[ColumnSpec],
        rows: &[Vec<Value>],
    ) -> Result<u64, WarehouseError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let sql = insert_sql(table, columns)?;
        if let Some((row, values)) = rows
            .iter()
            .enumerate()
            .find(|(_, values)| values.len() != columns.len())
        {
            return Err(WarehouseError::RowWidth {
                table: table.to_string(),
                row,
                expected: columns.len(),
                found: values.len(),
            });
        }

        let conn = self.lock()?;

        conn.execute("BEGIN TRANSACTION", [])
            .map_err(WarehouseError::query)?;

        let result = (|| {
            let mut stmt = conn.prepare(&sql).map_err(WarehouseError::query)?;
            for values in rows {
                let params: Vec<SqlValue> = values.iter().map(to_sql_value).collect();
                stmt.execute(rusqlite::params_from_iter(params))
                    .map_err(WarehouseError::query)?;
            }
            Ok::<_, WarehouseError>(())
        })();

        match result {
            Ok(()) => {
                conn.execute("COMMIT", []).map_err(WarehouseError::query)?;
                tracing::debug!(table, rows = rows.len(), "Inserted rows");
                Ok(rows.len() as u64)
            }
            Err(e) => {
                let _ = conn.execute("ROLLBACK", []);
                Err(e)
            }
        }
    }

    async fn start_sync_run(&self) -> Result<i64, WarehouseError> {
        let started_at = Utc::now().timestamp();
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO sync_runs (started_at) VALUES (?1)",
            [started_at],
        )
        .map_err(WarehouseError::query)?;
        Ok(conn.last_insert_rowid())
    }

    async fn complete_sync_run(
        &self,
        run_id: i64,
        stats: &SyncRunStats,
    ) -> Result<(), WarehouseError> {
        let completed_at = Utc::now().timestamp();
        let conn = self.lock()?;
        conn.execute(
            "UPDATE sync_runs SET completed_at = ?1, entities_synced = ?2, entities_deferred = ?3, records_written = ?4, rows_loaded = ?5, interrupted = ?6 WHERE id = ?7",
            rusqlite::params![
                completed_at,
                stats.entities_synced as i64,
                stats.entities_deferred as i64,
                stats.records_written as i64,
                stats.rows_loaded as i64,
                i64::from(stats.interrupted),
                run_id
            ],
        )
        .map_err(WarehouseError::query)?;
        Ok(())
    }

    async fn get_summary(&self) -> Result<RunSummary, WarehouseError> {
        let conn = self.lock()?;

        let total_runs = conn
            .query_row("SELECT COUNT(*) FROM sync_runs", [], |row| {
                row.get::<_, i64>(0)
            })
            .map_err(WarehouseError::query)? as u64;

        let interrupted_runs = conn
            .query_row(
                "SELECT COUNT(*) FROM sync_runs WHERE interrupted = 1",
                [],
                |row| row.get::<_, i64>(0),
            )
            .map_err(WarehouseError::query)? as u64;

        type LastRow = (i64, Option<i64>, i64, i64, i64, i64, i64);
        let last: Option<LastRow> = conn
            .query_row(
                "SELECT started_at, completed_at, entities_synced, entities_deferred, records_written, rows_loaded, interrupted FROM sync_runs ORDER BY id DESC LIMIT 1",
                [],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                    ))
                },
            )
            .optional()
            .map_err(WarehouseError::query)?;

        let mut summary = RunSummary {
            total_runs,
            interrupted_runs,
            ..RunSummary::default()
        };
        if let Some((started, completed, synced, deferred, written, loaded, interrupted)) = last {
            summary.last_started = Utc.timestamp_opt(started, 0).single();
            summary.last_completed = completed.and_then(|ts| Utc.timestamp_opt(ts, 0).single());
            if completed.is_some() {
                summary.last_stats = Some(SyncRunStats {
                    entities_synced: synced as u64,
                    entities_deferred: deferred as u64,
                    records_written: written as u64,
                    rows_loaded: loaded as u64,
                    interrupted: interrupted != 0,
                });
            }
        }
        Ok(summary)
    }
}
