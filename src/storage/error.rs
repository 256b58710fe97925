//! Error types for the object storage module.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    /// Blob path is empty, absolute, or escapes the container.
    #[error("Invalid blob path: {0}")]
    InvalidPath(String),

    #[error("Failed to read blob {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write blob {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Blob {blob} is not valid JSON: {source}")]
    Decode {
        blob: String,
        source: serde_json::Error,
    },

    #[error(transparent)]
    Encode(#[from] serde_json::Error),
}
