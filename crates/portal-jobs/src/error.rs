//! Job error types.

use portal_core::PortalError;
use std::time::Duration;
use thiserror::Error;

/// Result type for job operations.
pub type JobResult<T> = Result<T, JobError>;

/// Job-related errors.
#[derive(Debug, Error)]
pub enum JobError {
    /// Redis error.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Redis pool error.
    #[error("Redis pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Job not found, or not in a state the operation accepts.
    #[error("Job not found: {0}")]
    NotFound(String),

    /// Operation not allowed in the job's current state.
    #[error("Invalid job state: {0}")]
    InvalidState(String),

    /// Handler returned a failure.
    #[error("{0}")]
    Handler(String),

    /// Job timed out.
    #[error("Job timed out after {0:?}")]
    Timeout(Duration),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Lease store failure.
    #[error("Lock error: {0}")]
    Lock(String),
}

impl JobError {
    /// Returns true if this error should go through the retry path.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            JobError::Handler(_) | JobError::Timeout(_) | JobError::Redis(_) | JobError::Pool(_)
        )
    }

    /// Creates a handler failure from any displayable error.
    pub fn handler(err: impl std::fmt::Display) -> Self {
        JobError::Handler(err.to_string())
    }
}

impl From<PortalError> for JobError {
    fn from(err: PortalError) -> Self {
        match err {
            PortalError::NotFound { .. } => JobError::NotFound(err.to_string()),
            PortalError::InvalidState(msg) => JobError::InvalidState(msg),
            PortalError::Configuration(msg) => JobError::Configuration(msg),
            other => JobError::Handler(other.to_string()),
        }
    }
}

impl From<JobError> for PortalError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::NotFound(id) => PortalError::not_found("Job", id),
            JobError::InvalidState(msg) => PortalError::InvalidState(msg),
            JobError::Configuration(msg) => PortalError::Configuration(msg),
            JobError::Timeout(limit) => PortalError::Timeout(format!("job exceeded {limit:?}")),
            JobError::Serialization(e) => PortalError::Internal(e.to_string()),
            JobError::Handler(msg) => PortalError::Internal(msg),
            JobError::Redis(_) | JobError::Pool(_) | JobError::Lock(_) => PortalError::Queue(err.to_string()),
        }
    }
}
