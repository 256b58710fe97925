use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One syncable entity type and its API path, as listed in
/// `metadata/cosential_entities.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDescriptor {
    #[serde(rename = "Entity")]
    pub name: String,
    #[serde(rename = "Endpoint")]
    pub endpoint: String,
}

impl EntityDescriptor {
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
        }
    }
}

/// Sub-arrays to materialize for one entity, from `metadata/cosential_arrays.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityArrays {
    #[serde(rename = "Entity")]
    pub entity: String,
    #[serde(rename = "Arrays", default)]
    pub arrays: Vec<String>,
}

/// Array names configured for `entity`, in file order.
pub fn arrays_for<'a>(entity: &str, all: &'a [EntityArrays]) -> Vec<&'a str> {
    all.iter()
        .filter(|ea| ea.entity == entity)
        .flat_map(|ea| ea.arrays.iter().map(String::as_str))
        .collect()
}

/// Entity name → last synced change-feed version.
///
/// Serialized as a flat JSON object so it round-trips with
/// `metadata/latest_run_versions.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionCheckpoint(BTreeMap<String, i64>);

impl VersionCheckpoint {
    pub fn get(&self, entity: &str) -> Option<i64> {
        self.0.get(entity).copied()
    }

    pub fn insert(&mut self, entity: impl Into<String>, version: i64) -> Option<i64> {
        self.0.insert(entity.into(), version)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

impl FromIterator<(String, i64)> for VersionCheckpoint {
    fn from_iter<I: IntoIterator<Item = (String, i64)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Entity name → changed record ids for the current run, newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet(BTreeMap<String, Vec<String>>);

impl ChangeSet {
    pub fn get(&self, entity: &str) -> Option<&[String]> {
        self.0.get(entity).map(Vec::as_slice)
    }

    pub fn insert(&mut self, entity: impl Into<String>, ids: Vec<String>) {
        self.0.insert(entity.into(), ids);
    }

    /// Number of entities with resolved ids.
    pub fn len(&self) -> usize {
        self.0.len()
    }
}
