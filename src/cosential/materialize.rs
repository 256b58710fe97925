use serde_json::Value;
use tracing::{debug, info, warn};

use super::error::{json_type_name, Operation, SyncError};
use super::policy::FailurePolicy;
use super::session::ApiSession;
use super::types::{ChangeSet, EntityDescriptor};

/// Field injected into every sub-array item naming its parent record.
pub const OBJECT_ID_FIELD: &str = "ObjectId";

fn changed_ids<'a>(entity: &EntityDescriptor, change_set: &'a ChangeSet) -> Option<&'a [String]> {
    match change_set.get(&entity.name) {
        Some(ids) if !ids.is_empty() => Some(ids),
        _ => {
            debug!(entity = %entity.name, "No changed IDs to materialize");
            None
        }
    }
}

/// Fetch the full record for every changed id of `entity`.
///
/// Output follows change-set order. Ids whose fetch fails are handed to
/// `policy`; under skip they are left out. No deduplication: an id listed
/// twice is fetched and emitted twice.
pub async fn materialize_objects(
    session: &dyn ApiSession,
    entity: &EntityDescriptor,
    change_set: &ChangeSet,
    policy: FailurePolicy,
) -> Result<Vec<Value>, SyncError> {
    let Some(ids) = changed_ids(entity, change_set) else {
        return Ok(Vec::new());
    };

    let mut records = Vec::with_capacity(ids.len());
    for id in ids {
        let path = format!("{}/{}", entity.endpoint, id);
        match session.get(&path, &[]).await {
            Ok(record) => records.push(record),
            Err(source) => policy.handle(SyncError::record(
                Operation::MaterializeObject,
                &entity.name,
                id,
                source,
            ))?,
        }
    }

    info!(
        entity = %entity.name,
        requested = ids.len(),
        materialized = records.len(),
        "Materialized records"
    );
    Ok(records)
}

/// Fetch the `array_name` sub-collection of every changed id of `entity`,
/// tagging each object with [`OBJECT_ID_FIELD`].
///
/// A single-object response becomes one item; a list response is flattened
/// into the output. Any other response shape is logged and skipped whatever
/// the policy.
pub async fn materialize_array(
    session: &dyn ApiSession,
    entity: &EntityDescriptor,
    array_name: &str,
    change_set: &ChangeSet,
    policy: FailurePolicy,
) -> Result<Vec<Value>, SyncError> {
    let Some(ids) = changed_ids(entity, change_set) else {
        return Ok(Vec::new());
    };

    let mut items = Vec::new();
    for id in ids {
        let path = format!("{}/{}/{}", entity.endpoint, id, array_name);
        match session.get(&path, &[]).await {
            Ok(body) => {
                if let Err(found) = tag_items(body, id, &mut items) {
                    warn!(
                        entity = %entity.name,
                        id = %id,
                        array = array_name,
                        "Unexpected response type {} for sub-array, skipping",
                        found
                    );
                }
            }
            Err(source) => policy.handle(SyncError::record(
                Operation::MaterializeArray,
                &entity.name,
                id,
                source,
            ))?,
        }
    }

    info!(
        entity = %entity.name,
        array = array_name,
        parents = ids.len(),
        items = items.len(),
        "Materialized sub-array"
    );
    Ok(items)
}

/// Tag `body` with its parent id and append it to `out`.
///
/// Returns the JSON type name when `body` is neither an object nor a list.
fn tag_items(body: Value, parent_id: &str, out: &mut Vec<Value>) -> Result<(), &'static str> {
    match body {
        Value::Object(mut map) => {
            map.insert(OBJECT_ID_FIELD.to_string(), Value::from(parent_id));
            out.push(Value::Object(map));
            Ok(())
        }
        Value::Array(elements) => {
            out.extend(elements.into_iter().map(|mut element| {
                if let Value::Object(map) = &mut element {
                    map.insert(OBJECT_ID_FIELD.to_string(), Value::from(parent_id));
                }
                element
            }));
            Ok(())
        }
        other => Err(json_type_name(&other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cosential::error::ApiError;
    use crate::cosential::testing::{FakeSession, LogCapture};
    use serde_json::json;

    fn opportunities() -> EntityDescriptor {
        EntityDescriptor::new("Opportunities", "opportunities")
    }

    fn change_set(ids: &[&str]) -> ChangeSet {
        let mut cs = ChangeSet::default();
        cs.insert("Opportunities", ids.iter().map(|s| s.to_string()).collect());
        cs
    }

    #[tokio::test]
    async fn test_absent_entry_returns_empty_without_request() {
        let session = FakeSession::new();
        let out = materialize_objects(
            &session,
            &opportunities(),
            &ChangeSet::default(),
            FailurePolicy::Abort,
        )
        .await
        .unwrap();
        assert!(out.is_empty());
        assert_eq!(session.request_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_entry_returns_empty_without_request() {
        let session = FakeSession::new();
        let cs = change_set(&[]);
        let objects = materialize_objects(&session, &opportunities(), &cs, FailurePolicy::Abort)
            .await
            .unwrap();
        let arrays =
            materialize_array(&session, &opportunities(), "staffTeam", &cs, FailurePolicy::Abort)
                .await
                .unwrap();
        assert!(objects.is_empty());
        assert!(arrays.is_empty());
        assert_eq!(session.request_count(), 0);
    }

    #[tokio::test]
    async fn test_objects_follow_change_set_order() {
        let session = FakeSession::new()
            .json("opportunities/3", json!({"OpportunityId": 3}))
            .json("opportunities/1", json!({"OpportunityId": 1}))
            .json("opportunities/2", json!({"OpportunityId": 2}));
        let out = materialize_objects(
            &session,
            &opportunities(),
            &change_set(&["3", "1", "2"]),
            FailurePolicy::Skip,
        )
        .await
        .unwrap();
        assert_eq!(
            out,
            vec![
                json!({"OpportunityId": 3}),
                json!({"OpportunityId": 1}),
                json!({"OpportunityId": 2}),
            ]
        );
        assert_eq!(
            session.requested_paths(),
            vec!["opportunities/3", "opportunities/1", "opportunities/2"]
        );
        assert!(session.requests().iter().all(|r| r.query.is_empty()));
    }

    #[tokio::test]
    async fn test_failed_id_is_skipped() {
        let logs = LogCapture::default();
        let _guard = logs.install(tracing::Level::ERROR);
        let session = FakeSession::new()
            .json("opportunities/1", json!({"OpportunityId": 1}))
            .status("opportunities/2", 500)
            .json("opportunities/3", json!({"OpportunityId": 3}));
        let out = materialize_objects(
            &session,
            &opportunities(),
            &change_set(&["1", "2", "3"]),
            FailurePolicy::Skip,
        )
        .await
        .unwrap();
        assert_eq!(
            out,
            vec![json!({"OpportunityId": 1}), json!({"OpportunityId": 3})]
        );
        assert_eq!(session.request_count(), 3);

        let errors = logs.lines();
        assert_eq!(errors.len(), 1, "expected one error line, got {errors:?}");
        assert!(errors[0].contains("ERROR"));
        assert!(errors[0].contains("Opportunities"));
        assert!(errors[0].contains("id=2"));
    }

    #[tokio::test]
    async fn test_failed_id_aborts_under_abort_policy() {
        let session = FakeSession::new()
            .json("opportunities/1", json!({"OpportunityId": 1}))
            .status("opportunities/2", 500)
            .json("opportunities/3", json!({"OpportunityId": 3}));
        let err = materialize_objects(
            &session,
            &opportunities(),
            &change_set(&["1", "2", "3"]),
            FailurePolicy::Abort,
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            SyncError::Record {
                operation: Operation::MaterializeObject,
                ref id,
                source: ApiError::HttpStatus { status: 500, .. },
                ..
            } if id == "2"
        ));
        assert_eq!(session.request_count(), 2);
    }

    #[tokio::test]
    async fn test_materialization_is_idempotent() {
        let session = FakeSession::new()
            .json("opportunities/5", json!({"OpportunityId": 5, "Name": "Bridge"}))
            .json("opportunities/6", json!({"OpportunityId": 6, "Name": "Tunnel"}));
        let cs = change_set(&["6", "5"]);
        let first = materialize_objects(&session, &opportunities(), &cs, FailurePolicy::Skip)
            .await
            .unwrap();
        let second = materialize_objects(&session, &opportunities(), &cs, FailurePolicy::Skip)
            .await
            .unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_duplicate_ids_are_fetched_twice() {
        let session = FakeSession::new().json("opportunities/8", json!({"OpportunityId": 8}));
        let out = materialize_objects(
            &session,
            &opportunities(),
            &change_set(&["8", "8"]),
            FailurePolicy::Skip,
        )
        .await
        .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(session.request_count(), 2);
    }

    #[tokio::test]
    async fn test_single_object_sub_array_is_tagged() {
        let session = FakeSession::new().json("opportunities/42/staffTeam", json!({"x": 1}));
        let out = materialize_array(
            &session,
            &opportunities(),
            "staffTeam",
            &change_set(&["42"]),
            FailurePolicy::Skip,
        )
        .await
        .unwrap();
        assert_eq!(out, vec![json!({"x": 1, "ObjectId": "42"})]);
    }

    #[tokio::test]
    async fn test_list_sub_array_is_tagged_and_flattened() {
        let session = FakeSession::new()
            .json("opportunities/42/staffTeam", json!([{"y": 2}]))
            .json("opportunities/43/staffTeam", json!([{"y": 3}, {"y": 4}, 5]));
        let out = materialize_array(
            &session,
            &opportunities(),
            "staffTeam",
            &change_set(&["42", "43"]),
            FailurePolicy::Skip,
        )
        .await
        .unwrap();
        assert_eq!(
            out,
            vec![
                json!({"y": 2, "ObjectId": "42"}),
                json!({"y": 3, "ObjectId": "43"}),
                json!({"y": 4, "ObjectId": "43"}),
                json!(5),
            ]
        );
    }

    #[tokio::test]
    async fn test_unexpected_sub_array_shape_is_skipped_even_under_abort() {
        let session = FakeSession::new()
            .json("opportunities/1/clients", json!("not a record"))
            .json("opportunities/2/clients", json!([{"ClientId": 9}]));
        let out = materialize_array(
            &session,
            &opportunities(),
            "clients",
            &change_set(&["1", "2"]),
            FailurePolicy::Abort,
        )
        .await
        .unwrap();
        assert_eq!(out, vec![json!({"ClientId": 9, "ObjectId": "2"})]);
    }

    #[tokio::test]
    async fn test_sub_array_fetch_failure_skipped() {
        let session = FakeSession::new()
            .status("opportunities/1/clients", 404)
            .json("opportunities/2/clients", json!({"ClientId": 9}));
        let out = materialize_array(
            &session,
            &opportunities(),
            "clients",
            &change_set(&["1", "2"]),
            FailurePolicy::Skip,
        )
        .await
        .unwrap();
        assert_eq!(out, vec![json!({"ClientId": 9, "ObjectId": "2"})]);
    }

    #[test]
    fn test_tag_items_rejects_scalars() {
        let mut out = Vec::new();
        assert_eq!(tag_items(json!(3), "1", &mut out), Err("number"));
        assert_eq!(tag_items(json!(null), "1", &mut out), Err("null"));
        assert!(out.is_empty());
    }
}
