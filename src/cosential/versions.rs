use serde_json::Value;
use tracing::{info, warn};

use super::error::{ApiError, Operation, SyncError};
use super::pagination::fetch_page;
use super::policy::FailurePolicy;
use super::session::ApiSession;
use super::types::{EntityDescriptor, VersionCheckpoint};

/// Only the newest change-feed entry is needed to read the watermark.
const PROBE_SIZE: usize = 1;

/// Change-feed path with no version filter, newest first.
pub fn latest_changes_path(endpoint: &str) -> String {
    format!("{endpoint}/changes?reverse=true")
}

/// Read the current high-water-mark version of `entity`'s change feed.
///
/// A single unfiltered page request; `Ok(None)` when the feed is empty or
/// its newest entry carries no usable `Version`.
pub async fn probe_latest_version(
    session: &dyn ApiSession,
    entity: &EntityDescriptor,
) -> Result<Option<i64>, ApiError> {
    let path = latest_changes_path(&entity.endpoint);
    let page = fetch_page(session, &path, 0, PROBE_SIZE).await?;
    Ok(page
        .first()
        .and_then(|item| item.get("Version"))
        .and_then(version_value))
}

fn version_value(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Probe every entity and build the checkpoint for the next run.
///
/// When an entity's probe fails (and the policy skips) or finds no version,
/// its value from `previous` is carried over explicitly so a store that
/// treats a missing key as a deletion never loses it. Entities with neither
/// a fresh nor a previous version stay absent.
pub async fn refresh_checkpoint(
    session: &dyn ApiSession,
    entities: &[EntityDescriptor],
    previous: &VersionCheckpoint,
    policy: FailurePolicy,
) -> Result<VersionCheckpoint, SyncError> {
    let mut next = VersionCheckpoint::default();

    for entity in entities {
        match probe_latest_version(session, entity).await {
            Ok(Some(version)) => {
                info!(
                    entity = %entity.name,
                    version,
                    previous = ?previous.get(&entity.name),
                    "Latest version"
                );
                next.insert(entity.name.clone(), version);
                continue;
            }
            Ok(None) => {
                warn!(entity = %entity.name, "Change feed returned no version");
            }
            Err(source) => {
                policy.handle(SyncError::entity(
                    Operation::ProbeVersion,
                    &entity.name,
                    source,
                ))?;
            }
        }

        if let Some(version) = previous.get(&entity.name) {
            info!(entity = %entity.name, version, "Keeping previous version");
            next.insert(entity.name.clone(), version);
        }
    }

    Ok(next)
}
