use std::time::Duration;

use grid_domain::CloudProvider;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("provisioning failed in phase {phase}: {cause}\n{stderr}")]
    Provisioning {
        phase: String,
        stderr: String,
        cause: String,
    },
    #[error("no driver configured for provider: {0}")]
    NotConfigured(CloudProvider),
    #[error("invalid instance spec: {0}")]
    Validation(String),
    #[error("phase {phase} timed out after {timeout:?}")]
    Timeout { phase: String, timeout: Duration },
    #[error("failed to parse provisioning output: {0}")]
    OutputParse(String),
    #[error("internal driver error: {0}")]
    Internal(String),
}
