use thiserror::Error;

/// Errors raised by a single Cosential API call.
///
/// These propagate uncaught out of the fetch layer; the resolver,
/// materializer and checkpoint probe decide per entity or per id whether
/// to downgrade them via [`super::FailurePolicy`].
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP error {status} requesting {path}")]
    HttpStatus { status: u16, path: String },

    #[error("Unexpected response from {path}: expected {expected}, got {found}")]
    UnexpectedShape {
        path: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("Empty API path")]
    InvalidPath,

    #[error("Invalid header value for {header}")]
    InvalidHeader { header: &'static str },

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Step of the sync engine an error was raised from, used as log and error context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    ResolveChanges,
    MaterializeObject,
    MaterializeArray,
    ProbeVersion,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ResolveChanges => "resolve changes",
            Self::MaterializeObject => "materialize object",
            Self::MaterializeArray => "materialize array",
            Self::ProbeVersion => "probe version",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An [`ApiError`] annotated with the entity (and record id) it occurred for.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("{operation} failed for {entity}: {source}")]
    Entity {
        operation: Operation,
        entity: String,
        source: ApiError,
    },

    #[error("{operation} failed for {entity} with ID {id}: {source}")]
    Record {
        operation: Operation,
        entity: String,
        id: String,
        source: ApiError,
    },
}

impl SyncError {
    pub fn entity(operation: Operation, entity: &str, source: ApiError) -> Self {
        Self::Entity {
            operation,
            entity: entity.to_string(),
            source,
        }
    }

    pub fn record(operation: Operation, entity: &str, id: &str, source: ApiError) -> Self {
        Self::Record {
            operation,
            entity: entity.to_string(),
            id: id.to_string(),
            source,
        }
    }

    pub fn operation(&self) -> Operation {
        match self {
            Self::Entity { operation, .. } | Self::Record { operation, .. } => *operation,
        }
    }

    pub fn entity_name(&self) -> &str {
        match self {
            Self::Entity { entity, .. } | Self::Record { entity, .. } => entity,
        }
    }
}

/// Name of a JSON value's type, for shape-mismatch messages.
pub(crate) fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
