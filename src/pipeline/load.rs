//! Flatten staged JSON into warehouse tables.

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

use crate::cosential::error::json_type_name;
use crate::storage::StorageError;
use crate::warehouse::{ColumnSpec, Warehouse, WarehouseError};

use super::metadata::{TableSchemas, TableSpec};
use super::Staging;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Staged blob {blob} for table {table} does not exist")]
    MissingBlob { table: String, blob: String },

    #[error("Staged blob {blob} holds {found}, expected a list of records")]
    NotAList { blob: String, found: &'static str },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Warehouse(#[from] WarehouseError),
}

/// One positional row per record; a column missing from a record, or any
/// non-object record, yields NULL.
pub fn build_rows(records: &[Value], columns: &[ColumnSpec]) -> Vec<Vec<Value>> {
    records
        .iter()
        .map(|record| {
            columns
                .iter()
                .map(|col| record.get(&col.name).cloned().unwrap_or(Value::Null))
                .collect()
        })
        .collect()
}

pub struct Loader<'a> {
    pub warehouse: &'a dyn Warehouse,
    pub staging: Staging<'a>,
}

impl Loader<'_> {
    /// Load every table configured for `entity`. Returns the number of rows
    /// inserted across all of them.
    pub async fn load_entity(&self, schemas: &TableSchemas, entity: &str) -> Result<u64, LoadError> {
        let mut total = 0;
        let mut tables = 0;
        for table in schemas.tables_for(entity) {
            total += self.load_table(entity, table).await?;
            tables += 1;
        }
        if tables == 0 {
            debug!(entity, "No warehouse tables configured");
        }
        Ok(total)
    }

    async fn load_table(&self, entity: &str, table: &TableSpec) -> Result<u64, LoadError> {
        let blob = table.source_blob(entity, &self.staging.partition, self.staging.run_tag);
        let data = self
            .staging
            .store
            .read_json(&blob)
            .await?
            .ok_or_else(|| LoadError::MissingBlob {
                table: table.table_name.clone(),
                blob: blob.clone(),
            })?;

        let records = match data {
            Value::Array(records) => records,
            other => {
                return Err(LoadError::NotAList {
                    blob,
                    found: json_type_name(&other),
                })
            }
        };

        self.warehouse
            .ensure_table(&table.table_name, &table.columns)
            .await?;

        if records.is_empty() {
            debug!(table = %table.table_name, blob = %blob, "Nothing to load");
            return Ok(0);
        }

        let rows = build_rows(&records, &table.columns);
        let inserted = self
            .warehouse
            .insert_rows(&table.table_name, &table.columns, &rows)
            .await?;
        info!(entity, table = %table.table_name, rows = inserted, "Loaded table");
        Ok(inserted)
    }
}
