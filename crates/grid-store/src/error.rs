use thiserror::Error;

use grid_domain::JobId;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("job not found: {0}")]
    JobNotFound(JobId),

    #[error("builder not found: {0}")]
    BuilderNotFound(String),

    #[error("instance not found: {0}")]
    InstanceNotFound(String),

    #[error("builder already registered and healthy: {0}")]
    BuilderConflict(String),

    #[error("illegal transition for job {job_id}: {from} -> {to}")]
    IllegalTransition {
        job_id: JobId,
        from: String,
        to: String,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal store error: {0}")]
    Internal(String),
}
