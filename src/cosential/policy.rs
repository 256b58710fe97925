use super::error::SyncError;

/// What to do when a per-entity or per-record API call fails.
///
/// Injected into the resolver, materializer and checkpoint probe so that
/// one run-wide choice governs every downgrade site.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum FailurePolicy {
    /// Log the failure with its context and continue with the next item.
    #[default]
    Skip,
    /// Stop the run at the first failure.
    Abort,
}

impl FailurePolicy {
    /// Apply the policy: `Ok(())` means the caller skips the item and carries on.
    pub fn handle(self, err: SyncError) -> Result<(), SyncError> {
        match self {
            FailurePolicy::Skip => {
                match &err {
                    SyncError::Entity {
                        operation, entity, ..
                    } => tracing::error!(
                        entity = %entity,
                        operation = %operation,
                        error = %err,
                        "Skipping entity"
                    ),
                    SyncError::Record {
                        operation,
                        entity,
                        id,
                        ..
                    } => tracing::error!(
                        entity = %entity,
                        id = %id,
                        operation = %operation,
                        error = %err,
                        "Skipping record"
                    ),
                }
                Ok(())
            }
            FailurePolicy::Abort => Err(err),
        }
    }
}
