//! Cosential sync engine: paged fetches, change-set resolution, record
//! materialization and version checkpoints against the Compass REST API.

pub mod changes;
pub mod error;
pub mod materialize;
pub mod pagination;
pub mod policy;
pub mod session;
pub mod types;
pub mod versions;

#[cfg(test)]
pub(crate) mod testing;

pub use changes::resolve;
pub use error::SyncError;
pub use materialize::{materialize_array, materialize_objects};
pub use policy::FailurePolicy;
pub use session::{ApiSession, CosentialClient, Credentials};
pub use types::{arrays_for, ChangeSet, EntityArrays, EntityDescriptor, VersionCheckpoint};
pub use versions::refresh_checkpoint;
