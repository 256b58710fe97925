//! Staging storage for metadata, checkpoints and materialized batches.
//!
//! Blobs are JSON documents addressed by a `/`-separated path inside one
//! container. Per-run output is partitioned by date:
//! `{Entity}/year=YYYY/month=MM/day=DD/run={tag}.json` for records and
//! `{Entity}/year=YYYY/month=MM/day=DD/{array}.json` for sub-arrays.

pub mod error;
pub mod local;

use async_trait::async_trait;
use chrono::{Datelike, Local, NaiveDate};
use serde_json::Value;

pub use error::StorageError;
pub use local::LocalObjectStore;

pub const ENTITIES_BLOB: &str = "metadata/cosential_entities.json";
pub const ARRAYS_BLOB: &str = "metadata/cosential_arrays.json";
pub const SCHEMAS_BLOB: &str = "metadata/Cosential_Table_Schemas.json";
pub const VERSIONS_BLOB: &str = "metadata/latest_run_versions.json";

/// Entity tag and file name the checkpoint is written under; together they
/// address [`VERSIONS_BLOB`].
pub const METADATA_TAG: &str = "metadata";
pub const VERSIONS_FILE: &str = "latest_run_versions.json";

/// Object storage collaborator.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Read and decode a blob. `Ok(None)` when it does not exist.
    async fn read_json(&self, path: &str) -> Result<Option<Value>, StorageError>;

    /// Write `data` to `{entity_tag}/{path}`, replacing any existing blob.
    /// Returns the location written.
    async fn write_json(
        &self,
        entity_tag: &str,
        path: &str,
        data: &Value,
    ) -> Result<String, StorageError>;
}

/// Date partition of one run's staged output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Partition {
    date: NaiveDate,
}

impl Partition {
    pub fn today() -> Self {
        Self::for_date(Local::now().date_naive())
    }

    pub fn for_date(date: NaiveDate) -> Self {
        Self { date }
    }

    /// `year=YYYY/month=MM/day=DD`
    pub fn path(&self) -> String {
        format!(
            "year={:04}/month={:02}/day={:02}",
            self.date.year(),
            self.date.month(),
            self.date.day()
        )
    }

    /// Records file of a run, relative to the entity tag.
    pub fn run_blob(&self, run_tag: &str) -> String {
        format!("{}/run={run_tag}.json", self.path())
    }

    /// Named file inside the partition, relative to the entity tag.
    pub fn file_blob(&self, file_name: &str) -> String {
        format!("{}/{file_name}", self.path())
    }

    /// Sub-array file of an entity, relative to the entity tag.
    pub fn array_blob(&self, array_name: &str) -> String {
        self.file_blob(&format!("{array_name}.json"))
    }
}

impl std::fmt::Display for Partition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.path())
    }
}

/// Join an entity tag and a relative blob path.
pub fn entity_blob(entity_tag: &str, path: &str) -> String {
    format!("{entity_tag}/{path}")
}
