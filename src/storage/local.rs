use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tokio::fs;

use super::error::StorageError;
use super::{entity_blob, ObjectStore};

/// Filesystem-backed container: each blob is a file under
/// `{root}/{container}/{blob path}`.
///
/// Writes go to a `.part` sibling first and are renamed into place so a
/// reader never sees a half-written batch.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    container: String,
    base: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: &Path, container: &str) -> Result<Self, StorageError> {
        validate_blob_path(container)?;
        Ok(Self {
            container: container.to_string(),
            base: root.join(container),
        })
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    fn resolve(&self, blob: &str) -> Result<PathBuf, StorageError> {
        validate_blob_path(blob)?;
        Ok(self.base.join(blob))
    }
}

/// Reject empty paths, absolute paths, `..` components and a leading `.`.
fn validate_blob_path(blob: &str) -> Result<(), StorageError> {
    if blob.trim().is_empty() {
        return Err(StorageError::InvalidPath(blob.to_string()));
    }
    let ok = Path::new(blob)
        .components()
        .all(|c| matches!(c, Component::Normal(_)));
    if ok {
        Ok(())
    } else {
        Err(StorageError::InvalidPath(blob.to_string()))
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn read_json(&self, path: &str) -> Result<Option<Value>, StorageError> {
        let file = self.resolve(path)?;
        let bytes = match fs::read(&file).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(container = %self.container, blob = path, "Blob not found");
                return Ok(None);
            }
            Err(source) => return Err(StorageError::Read { path: file, source }),
        };
        let value = serde_json::from_slice(&bytes).map_err(|source| StorageError::Decode {
            blob: path.to_string(),
            source,
        })?;
        tracing::debug!(container = %self.container, blob = path, "Read blob");
        Ok(Some(value))
    }

    async fn write_json(
        &self,
        entity_tag: &str,
        path: &str,
        data: &Value,
    ) -> Result<String, StorageError> {
        let blob = entity_blob(entity_tag, path);
        let file = self.resolve(&blob)?;
        let body = serde_json::to_vec_pretty(data)?;

        if let Some(parent) = file.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|source| StorageError::Write {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        let mut part = file.clone().into_os_string();
        part.push(".part");
        let part = PathBuf::from(part);

        fs::write(&part, &body)
            .await
            .map_err(|source| StorageError::Write {
                path: part.clone(),
                source,
            })?;
        fs::rename(&part, &file)
            .await
            .map_err(|source| StorageError::Write {
                path: file.clone(),
                source,
            })?;

        let location = format!("{}/{}", self.container, blob);
        tracing::info!(entity = entity_tag, location = %location, bytes = body.len(), "Uploaded blob");
        Ok(location)
    }
}
