// crates/broker/src/error.rs
use thiserror::Error;

use crate::types::JobId;

/// Errors returned by broker operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    #[error("Unknown job: {0}")]
    UnknownJob(JobId),

    #[error("Duplicate job: {0}")]
    DuplicateJob(JobId),

    #[error("Job already finished: {0}")]
    JobTerminated(JobId),

    #[error("Could not allocate a job id after {0} attempts")]
    IdExhausted(usize),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

pub type BrokerResult<T> = Result<T, BrokerError>;

impl BrokerError {
    /// Job the error refers to, used when surfacing it as an `error` event.
    pub fn job_id(&self) -> Option<&JobId> {
        match self {
            BrokerError::UnknownJob(id)
            | BrokerError::DuplicateJob(id)
            | BrokerError::JobTerminated(id) => Some(id),
            BrokerError::IdExhausted(_) | BrokerError::Protocol(_) => None,
        }
    }
}
