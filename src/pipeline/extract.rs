//! Per-entity extract: resolve changed ids, materialize full records and
//! sub-arrays, and stage them as JSON blobs.

use serde_json::Value;
use tracing::info;

use crate::cosential::{
    arrays_for, materialize_array, materialize_objects, resolve, ApiSession, ChangeSet,
    EntityArrays, EntityDescriptor, FailurePolicy, SyncError, VersionCheckpoint,
};
use crate::storage::StorageError;

use super::Staging;

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error("Failed to stage {entity}: {source}")]
    Stage {
        entity: String,
        source: StorageError,
    },
}

/// How an entity's change feed was handled this run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// No checkpoint yet; nothing was fetched.
    Untracked,
    /// Feed fetch failed and was skipped; the checkpoint must not advance.
    Deferred,
    /// Changed ids resolved and their records staged.
    Resolved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityExtract {
    pub resolution: Resolution,
    pub records: usize,
    pub array_items: usize,
}

pub struct Extractor<'a> {
    pub session: &'a dyn ApiSession,
    pub staging: Staging<'a>,
    pub policy: FailurePolicy,
}

impl Extractor<'_> {
    /// Extract one entity. Resolved ids are recorded in `change_set` under
    /// the entity's name.
    ///
    /// The run blob and one blob per configured sub-array are written even
    /// when empty, so the load step always finds its inputs.
    pub async fn extract_entity(
        &self,
        entity: &EntityDescriptor,
        arrays: &[EntityArrays],
        checkpoint: &VersionCheckpoint,
        change_set: &mut ChangeSet,
    ) -> Result<EntityExtract, ExtractError> {
        let resolution = match resolve(self.session, entity, checkpoint, self.policy).await? {
            Some(ids) => {
                change_set.insert(entity.name.clone(), ids);
                Resolution::Resolved
            }
            None if checkpoint.get(&entity.name).is_none() => Resolution::Untracked,
            None => Resolution::Deferred,
        };

        let records = materialize_objects(self.session, entity, change_set, self.policy).await?;

        let mut array_items = 0;
        for array_name in arrays_for(&entity.name, arrays) {
            let items =
                materialize_array(self.session, entity, array_name, change_set, self.policy)
                    .await?;
            array_items += items.len();
            let path = self.staging.partition.array_blob(array_name);
            self.stage(entity, &path, items).await?;
        }

        let path = self.staging.partition.run_blob(self.staging.run_tag);
        let record_count = records.len();
        self.stage(entity, &path, records).await?;

        info!(
            entity = %entity.name,
            resolution = ?resolution,
            records = record_count,
            array_items,
            "Extracted entity"
        );
        Ok(EntityExtract {
            resolution,
            records: record_count,
            array_items,
        })
    }

    async fn stage(
        &self,
        entity: &EntityDescriptor,
        path: &str,
        items: Vec<Value>,
    ) -> Result<String, ExtractError> {
        self.staging
            .store
            .write_json(&entity.name, path, &Value::Array(items))
            .await
            .map_err(|source| ExtractError::Stage {
                entity: entity.name.clone(),
                source,
            })
    }
}
