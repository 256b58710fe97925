use serde_json::Value;
use tracing::{debug, info, warn};

use super::error::{Operation, SyncError};
use super::pagination::fetch_all;
use super::policy::FailurePolicy;
use super::session::ApiSession;
use super::types::{EntityDescriptor, VersionCheckpoint};

/// Change-feed path listing records changed after `version`, deletions
/// included, newest first.
pub fn changes_path(endpoint: &str, version: i64) -> String {
    format!("{endpoint}/changes?version={version}&includeDeleted=true&reverse=true")
}

/// Resolve the ids of `entity` records changed since its checkpoint.
///
/// Returns `Ok(None)` when the entity has no checkpoint entry (nothing to
/// sync yet, no request is made) or when the feed fetch failed and the
/// policy chose to skip. Ids keep the feed's newest-first order.
pub async fn resolve(
    session: &dyn ApiSession,
    entity: &EntityDescriptor,
    checkpoint: &VersionCheckpoint,
    policy: FailurePolicy,
) -> Result<Option<Vec<String>>, SyncError> {
    let Some(version) = checkpoint.get(&entity.name) else {
        info!(
            entity = %entity.name,
            "No checkpoint for entity; run `refresh-versions` to start tracking it"
        );
        return Ok(None);
    };

    let path = changes_path(&entity.endpoint, version);
    match fetch_all(session, &path).await {
        Ok(items) => {
            let ids = extract_ids(&entity.name, &items);
            info!(entity = %entity.name, version, changed = ids.len(), "Resolved changed IDs");
            debug!(entity = %entity.name, ids = ?ids, "Changed IDs");
            Ok(Some(ids))
        }
        Err(source) => {
            policy.handle(SyncError::entity(
                Operation::ResolveChanges,
                &entity.name,
                source,
            ))?;
            Ok(None)
        }
    }
}

/// Pull the `Id` of every change item, in order. Numeric ids are rendered in
/// decimal; items without a usable id are dropped with a warning.
pub(crate) fn extract_ids(entity: &str, items: &[Value]) -> Vec<String> {
    items
        .iter()
        .filter_map(|item| match item.get("Id") {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => {
                warn!(entity, "Change item without usable Id: {}", item);
                None
            }
        })
        .collect()
}
