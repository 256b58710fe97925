//! Run metadata kept in the staging container: entity list, sub-array
//! names, warehouse table schemas and the version checkpoint.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;

use crate::cosential::{EntityArrays, EntityDescriptor, VersionCheckpoint};
use crate::storage::{
    entity_blob, ObjectStore, Partition, StorageError, ARRAYS_BLOB, ENTITIES_BLOB, METADATA_TAG,
    SCHEMAS_BLOB, VERSIONS_BLOB, VERSIONS_FILE,
};
use crate::warehouse::ColumnSpec;

/// `file_name` value selecting the run's records file.
const DEFAULT_FILE: &str = "default";

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("Required metadata blob {0} is missing")]
    Missing(String),

    #[error("Metadata blob {blob} is malformed: {source}")]
    Invalid {
        blob: String,
        source: serde_json::Error,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// `Cosential_Table_Schemas.json`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TableSchemas {
    #[serde(rename = "Entities", default)]
    pub entities: Vec<EntityTables>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EntityTables {
    #[serde(rename = "Entity")]
    pub entity: String,
    #[serde(default)]
    pub tables: Vec<TableSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TableSpec {
    pub table_name: String,
    pub file_name: String,
    pub columns: Vec<ColumnSpec>,
}

impl TableSchemas {
    pub fn tables_for<'a>(&'a self, entity: &'a str) -> impl Iterator<Item = &'a TableSpec> + 'a {
        self.entities
            .iter()
            .filter(move |e| e.entity == entity)
            .flat_map(|e| e.tables.iter())
    }
}

impl TableSpec {
    /// Staged blob this table is loaded from: the run's records file for
    /// `"default"`, otherwise the named file in the same partition.
    pub fn source_blob(&self, entity: &str, partition: &Partition, run_tag: &str) -> String {
        if self.file_name == DEFAULT_FILE {
            entity_blob(entity, &partition.run_blob(run_tag))
        } else {
            entity_blob(entity, &partition.file_blob(&self.file_name))
        }
    }
}

async fn read_optional<T: DeserializeOwned>(
    store: &dyn ObjectStore,
    blob: &str,
) -> Result<Option<T>, MetadataError> {
    match store.read_json(blob).await? {
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(|source| MetadataError::Invalid {
                blob: blob.to_string(),
                source,
            }),
        None => Ok(None),
    }
}

async fn read_required<T: DeserializeOwned>(
    store: &dyn ObjectStore,
    blob: &str,
) -> Result<T, MetadataError> {
    read_optional(store, blob)
        .await?
        .ok_or_else(|| MetadataError::Missing(blob.to_string()))
}

pub async fn read_entities(store: &dyn ObjectStore) -> Result<Vec<EntityDescriptor>, MetadataError> {
    read_required(store, ENTITIES_BLOB).await
}

/// Sub-array configuration; a missing file means no entity has sub-arrays.
pub async fn read_arrays(store: &dyn ObjectStore) -> Result<Vec<EntityArrays>, MetadataError> {
    let arrays = read_optional(store, ARRAYS_BLOB).await?;
    if arrays.is_none() {
        tracing::info!(blob = ARRAYS_BLOB, "No sub-array metadata, skipping sub-arrays");
    }
    Ok(arrays.unwrap_or_default())
}

pub async fn read_schemas(store: &dyn ObjectStore) -> Result<TableSchemas, MetadataError> {
    read_required(store, SCHEMAS_BLOB).await
}

/// Previous checkpoint. Required by every run that resolves changes: a
/// lost checkpoint must not be re-baselined at the current feed head.
pub async fn read_versions(store: &dyn ObjectStore) -> Result<VersionCheckpoint, MetadataError> {
    read_required(store, VERSIONS_BLOB).await
}

/// Previous checkpoint for `refresh-versions`, the bootstrap path; missing
/// means no entity is tracked yet.
pub async fn read_versions_or_default(
    store: &dyn ObjectStore,
) -> Result<VersionCheckpoint, MetadataError> {
    let versions = read_optional(store, VERSIONS_BLOB).await?;
    if versions.is_none() {
        tracing::warn!(
            blob = VERSIONS_BLOB,
            "No version checkpoint found; starting every entity at its current version"
        );
    }
    Ok(versions.unwrap_or_default())
}

pub async fn write_versions(
    store: &dyn ObjectStore,
    versions: &VersionCheckpoint,
) -> Result<String, MetadataError> {
    let data = serde_json::to_value(versions).map_err(StorageError::Encode)?;
    Ok(store.write_json(METADATA_TAG, VERSIONS_FILE, &data).await?)
}

/// Everything the extract step needs, read once per run.
#[derive(Debug, Clone)]
pub struct RunMetadata {
    pub entities: Vec<EntityDescriptor>,
    pub arrays: Vec<EntityArrays>,
    pub versions: VersionCheckpoint,
}

impl RunMetadata {
    pub async fn read(store: &dyn ObjectStore) -> Result<Self, MetadataError> {
        let entities = read_entities(store).await?;
        let arrays = read_arrays(store).await?;
        let versions = read_versions(store).await?;
        tracing::info!(
            entities = entities.len(),
            tracked = versions.len(),
            "Loaded run metadata"
        );
        Ok(Self {
            entities,
            arrays,
            versions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LocalObjectStore;
    use chrono::NaiveDate;
    use serde_json::json;
    use std::path::PathBuf;

    fn test_store(name: &str) -> LocalObjectStore {
        let dir: PathBuf = std::env::temp_dir()
            .join("cosential-sync-tests")
            .join("metadata")
            .join(name);
        let _ = std::fs::remove_dir_all(&dir);
        LocalObjectStore::new(&dir, "raw").unwrap()
    }

    fn schemas() -> TableSchemas {
        serde_json::from_value(json!({
            "Entities": [{
                "Entity": "Opportunities",
                "tables": [
                    {"table_name": "stg_opportunities", "file_name": "default",
                     "columns": [{"name": "OpportunityId", "type": "Integer"}]},
                    {"table_name": "stg_opportunity_staff", "file_name": "staffTeam.json",
                     "columns": [{"name": "ObjectId", "type": "String", "length": 50}]}
                ]
            }]
        }))
        .unwrap()
    }

    #[test]
    fn test_source_blob_for_default_and_named_files() {
        let partition = Partition::for_date(NaiveDate::from_ymd_opt(2024, 11, 5).unwrap());
        let schemas = schemas();
        let tables: Vec<&TableSpec> = schemas.tables_for("Opportunities").collect();
        assert_eq!(tables.len(), 2);
        assert_eq!(
            tables[0].source_blob("Opportunities", &partition, "temp"),
            "Opportunities/year=2024/month=11/day=05/run=temp.json"
        );
        assert_eq!(
            tables[1].source_blob("Opportunities", &partition, "temp"),
            "Opportunities/year=2024/month=11/day=05/staffTeam.json"
        );
        assert_eq!(schemas.tables_for("Contacts").count(), 0);
    }

    #[tokio::test]
    async fn test_missing_entities_is_an_error() {
        let store = test_store("missing_entities");
        assert!(matches!(
            read_entities(&store).await,
            Err(MetadataError::Missing(blob)) if blob == ENTITIES_BLOB
        ));
    }

    #[tokio::test]
    async fn test_missing_arrays_are_empty() {
        let store = test_store("missing_optional");
        assert!(read_arrays(&store).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_versions_required_except_for_bootstrap() {
        let store = test_store("missing_versions");
        assert!(matches!(
            read_versions(&store).await,
            Err(MetadataError::Missing(blob)) if blob == VERSIONS_BLOB
        ));
        assert!(read_versions_or_default(&store).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_run_metadata_requires_versions() {
        let store = test_store("run_metadata_no_versions");
        store
            .write_json(
                "metadata",
                "cosential_entities.json",
                &json!([{"Entity": "Contacts", "Endpoint": "contacts"}]),
            )
            .await
            .unwrap();
        assert!(matches!(
            RunMetadata::read(&store).await,
            Err(MetadataError::Missing(blob)) if blob == VERSIONS_BLOB
        ));
    }

    #[tokio::test]
    async fn test_malformed_entities_rejected() {
        let store = test_store("malformed");
        store
            .write_json("metadata", "cosential_entities.json", &json!([{"Entity": "X"}]))
            .await
            .unwrap();
        assert!(matches!(
            read_entities(&store).await,
            Err(MetadataError::Invalid { .. })
        ));
    }

    #[tokio::test]
    async fn test_versions_round_trip_through_store() {
        let store = test_store("versions");
        let versions: VersionCheckpoint = [("Opportunities".to_string(), 812)].into_iter().collect();
        let location = write_versions(&store, &versions).await.unwrap();
        assert_eq!(location, "raw/metadata/latest_run_versions.json");
        assert_eq!(read_versions(&store).await.unwrap(), versions);
    }

    #[tokio::test]
    async fn test_run_metadata_reads_all_blobs() {
        let store = test_store("run_metadata");
        store
            .write_json(
                "metadata",
                "cosential_entities.json",
                &json!([{"Entity": "Opportunities", "Endpoint": "opportunities"}]),
            )
            .await
            .unwrap();
        store
            .write_json(
                "metadata",
                "cosential_arrays.json",
                &json!([{"Entity": "Opportunities", "Arrays": ["staffTeam"]}]),
            )
            .await
            .unwrap();
        store
            .write_json("metadata", "latest_run_versions.json", &json!({"Opportunities": 5}))
            .await
            .unwrap();

        let meta = RunMetadata::read(&store).await.unwrap();
        assert_eq!(meta.entities.len(), 1);
        assert_eq!(meta.arrays[0].arrays, vec!["staffTeam"]);
        assert_eq!(meta.versions.get("Opportunities"), Some(5));
    }
}
