use thiserror::Error;

use crate::scheduler::JobId;

#[derive(Error, Debug)]
pub enum RtotError {
    #[error("Failed to create script artifact: {0}")]
    ArtifactCreation(#[source] std::io::Error),

    #[error("Failed to clean up script artifact: {0}")]
    Cleanup(#[source] std::io::Error),

    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Job {0} already belongs to a group")]
    JobAlreadyAdded(JobId),

    #[error("Job id already in use: {0}")]
    DuplicateJobId(JobId),

    #[error("No such process for job {0}")]
    NoSuchProcess(JobId),

    #[error("Invalid store kind: {0}")]
    InvalidStoreKind(String),

    #[error("Job group not found: {0}")]
    JobGroupNotFound(String),

    #[error("Execution task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RtotError>;
