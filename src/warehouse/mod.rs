//! Relational warehouse for flattened entity rows.
//!
//! Tables are created on first load from the table schema metadata and
//! receive positional rows extracted from staged JSON. The same database
//! keeps a `sync_runs` ledger so `status` can report on past runs.

pub mod db;
pub mod error;
pub mod schema;
pub mod types;

pub use db::{SqliteWarehouse, Warehouse};
pub use error::WarehouseError;
pub use types::{ColumnSpec, SyncRunStats};
