//! Run orchestration: metadata, the next checkpoint, then extract and load
//! per entity.
//!
//! The next checkpoint is taken before any change feed is read and written
//! only after every entity has been visited. Changes made during the run
//! stay above it, and an interrupted or aborted run leaves the previous one
//! in place.

pub mod extract;
pub mod load;
pub mod metadata;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cosential::{
    refresh_checkpoint, ApiSession, ChangeSet, EntityDescriptor, FailurePolicy, SyncError,
    VersionCheckpoint,
};
use crate::storage::{ObjectStore, Partition};
use crate::warehouse::{SyncRunStats, Warehouse, WarehouseError};

use extract::{ExtractError, Extractor, Resolution};
use load::{LoadError, Loader};
use metadata::{MetadataError, RunMetadata, TableSchemas};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error("Failed to load {entity}: {source}")]
    Load { entity: String, source: LoadError },

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Warehouse(#[from] WarehouseError),
}

/// Where a run reads and writes its staged blobs.
#[derive(Clone, Copy)]
pub struct Staging<'a> {
    pub store: &'a dyn ObjectStore,
    pub partition: Partition,
    pub run_tag: &'a str,
}

/// Per-entity outcome of a run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub synced: Vec<String>,
    pub untracked: Vec<String>,
    pub deferred: Vec<String>,
    pub failed: Vec<String>,
    pub records_written: u64,
    pub rows_loaded: u64,
    /// Checkpoint written at the end of the run, if any.
    pub checkpoint: Option<VersionCheckpoint>,
    pub interrupted: bool,
}

impl RunReport {
    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }

    fn record(&mut self, entity: &str, resolution: Resolution) {
        let bucket = match resolution {
            Resolution::Resolved => &mut self.synced,
            Resolution::Untracked => &mut self.untracked,
            Resolution::Deferred => &mut self.deferred,
        };
        bucket.push(entity.to_string());
    }

    fn stats(&self) -> SyncRunStats {
        SyncRunStats {
            entities_synced: self.synced.len() as u64,
            entities_deferred: (self.deferred.len() + self.failed.len()) as u64,
            records_written: self.records_written,
            rows_loaded: self.rows_loaded,
            interrupted: self.interrupted,
        }
    }

    fn log_summary(&self, label: &str) {
        info!(
            synced = self.synced.len(),
            untracked = self.untracked.len(),
            deferred = self.deferred.len(),
            failed = self.failed.len(),
            records = self.records_written,
            rows = self.rows_loaded,
            interrupted = self.interrupted,
            "{label} finished"
        );
        if !self.deferred.is_empty() {
            warn!(entities = ?self.deferred, "Deferred entities keep their previous checkpoint");
        }
        if self.has_failures() {
            error!(entities = ?self.failed, "Entities failed");
        }
    }
}

/// Stop point between entities; the current entity always finishes.
fn stop_requested(shutdown: &CancellationToken, next: &EntityDescriptor) -> bool {
    if shutdown.is_cancelled() {
        warn!(next = %next.name, "Shutdown requested, stopping before next entity");
        true
    } else {
        false
    }
}

pub struct Pipeline<'a> {
    pub session: &'a dyn ApiSession,
    pub staging: Staging<'a>,
    pub warehouse: &'a dyn Warehouse,
    pub policy: FailurePolicy,
    pub shutdown: CancellationToken,
}

impl Pipeline<'_> {
    /// Full run: take the next checkpoint, extract and load every entity,
    /// then write the checkpoint. The run is recorded in the warehouse ledger
    /// whatever the outcome.
    pub async fn sync(&self) -> Result<RunReport, PipelineError> {
        let meta = RunMetadata::read(self.staging.store).await?;
        let schemas = metadata::read_schemas(self.staging.store).await?;
        let run_id = self.warehouse.start_sync_run().await?;

        let mut report = RunReport::default();
        let outcome = self.sync_entities(&meta, &schemas, &mut report).await;

        let mut stats = report.stats();
        stats.interrupted |= outcome.is_err();
        self.warehouse.complete_sync_run(run_id, &stats).await?;
        outcome?;

        if report.interrupted {
            warn!("Run interrupted; checkpoint left unchanged");
        }
        report.log_summary("Sync");
        Ok(report)
    }

    /// Stage records for every entity without loading or touching the
    /// checkpoint.
    pub async fn extract(&self) -> Result<RunReport, PipelineError> {
        let meta = RunMetadata::read(self.staging.store).await?;
        let mut report = RunReport::default();
        self.process_entities(&meta, None, &mut report).await?;
        report.log_summary("Extract");
        Ok(report)
    }

    /// Probe every entity's latest version and write the checkpoint.
    pub async fn refresh_versions(&self) -> Result<VersionCheckpoint, PipelineError> {
        let entities = metadata::read_entities(self.staging.store).await?;
        let previous = metadata::read_versions_or_default(self.staging.store).await?;
        let next = refresh_checkpoint(self.session, &entities, &previous, self.policy).await?;
        if next.is_empty() {
            warn!("No entity reported a version; writing an empty checkpoint");
        }
        let location = metadata::write_versions(self.staging.store, &next).await?;
        info!(location = %location, entities = next.len(), "Wrote version checkpoint");
        Ok(next)
    }

    async fn sync_entities(
        &self,
        meta: &RunMetadata,
        schemas: &TableSchemas,
        report: &mut RunReport,
    ) -> Result<(), PipelineError> {
        if self.shutdown.is_cancelled() {
            warn!("Shutdown requested before the run started");
            report.interrupted = true;
            return Ok(());
        }
        let next =
            refresh_checkpoint(self.session, &meta.entities, &meta.versions, self.policy).await?;
        self.process_entities(meta, Some(schemas), report).await?;
        if !report.interrupted {
            self.write_checkpoint(meta, next, report).await?;
        }
        Ok(())
    }

    async fn process_entities(
        &self,
        meta: &RunMetadata,
        schemas: Option<&TableSchemas>,
        report: &mut RunReport,
    ) -> Result<(), PipelineError> {
        let extractor = Extractor {
            session: self.session,
            staging: self.staging,
            policy: self.policy,
        };
        let loader = Loader {
            warehouse: self.warehouse,
            staging: self.staging,
        };
        let mut change_set = ChangeSet::default();

        for entity in &meta.entities {
            if stop_requested(&self.shutdown, entity) {
                report.interrupted = true;
                break;
            }

            let extracted = match extractor
                .extract_entity(entity, &meta.arrays, &meta.versions, &mut change_set)
                .await
            {
                Ok(extracted) => extracted,
                Err(err @ ExtractError::Stage { .. }) if self.policy == FailurePolicy::Skip => {
                    error!(entity = %entity.name, error = %err, "Skipping entity");
                    report.failed.push(entity.name.clone());
                    continue;
                }
                Err(ExtractError::Sync(err)) => {
                    error!(
                        entity = err.entity_name(),
                        operation = %err.operation(),
                        error = %err,
                        "Aborting run"
                    );
                    return Err(ExtractError::Sync(err).into());
                }
                Err(err) => return Err(err.into()),
            };
            report.records_written += (extracted.records + extracted.array_items) as u64;

            if let Some(schemas) = schemas {
                match loader.load_entity(schemas, &entity.name).await {
                    Ok(rows) => report.rows_loaded += rows,
                    Err(source) if self.policy == FailurePolicy::Skip => {
                        error!(entity = %entity.name, error = %source, "Skipping entity load");
                        report.failed.push(entity.name.clone());
                        continue;
                    }
                    Err(source) => {
                        return Err(PipelineError::Load {
                            entity: entity.name.clone(),
                            source,
                        })
                    }
                }
            }

            report.record(&entity.name, extracted.resolution);
        }
        debug!(entities = change_set.len(), "Change set resolved");
        Ok(())
    }

    /// Write the checkpoint taken at the start of the run, holding back
    /// deferred and failed entities at their previous version.
    async fn write_checkpoint(
        &self,
        meta: &RunMetadata,
        mut next: VersionCheckpoint,
        report: &mut RunReport,
    ) -> Result<(), PipelineError> {
        for name in report.deferred.iter().chain(report.failed.iter()) {
            if let Some(version) = meta.versions.get(name) {
                next.insert(name.clone(), version);
            }
        }
        let location = metadata::write_versions(self.staging.store, &next).await?;
        info!(location = %location, entities = next.len(), "Wrote version checkpoint");
        report.checkpoint = Some(next);
        Ok(())
    }
}

/// Load already-staged blobs for every entity into the warehouse.
pub async fn run_load(
    staging: Staging<'_>,
    warehouse: &dyn Warehouse,
    policy: FailurePolicy,
    shutdown: &CancellationToken,
) -> Result<RunReport, PipelineError> {
    let entities = metadata::read_entities(staging.store).await?;
    let schemas = metadata::read_schemas(staging.store).await?;
    let loader = Loader { warehouse, staging };

    let mut report = RunReport::default();
    for entity in &entities {
        if stop_requested(shutdown, entity) {
            report.interrupted = true;
            break;
        }
        match loader.load_entity(&schemas, &entity.name).await {
            Ok(rows) => {
                report.rows_loaded += rows;
                report.synced.push(entity.name.clone());
            }
            Err(source) if policy == FailurePolicy::Skip => {
                error!(entity = %entity.name, error = %source, "Skipping entity load");
                report.failed.push(entity.name.clone());
            }
            Err(source) => {
                return Err(PipelineError::Load {
                    entity: entity.name.clone(),
                    source,
                })
            }
        }
    }
    report.log_summary("Load");
    Ok(report)
}
