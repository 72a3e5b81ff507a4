use thiserror::Error;

use crate::job::JobStatus;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Job already exists: {0}")]
    JobExists(String),

    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("Unknown job status: {0}")]
    UnknownStatus(String),

    #[error("Unknown user role: {0}")]
    UnknownRole(String),

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Object not found: {bucket}/{key}")]
    ObjectNotFound { bucket: String, key: String },

    #[error("Archive not found: {0}")]
    ArchiveNotFound(String),

    #[error("Retrieval job not found: {0}")]
    RetrievalJobNotFound(String),

    #[error("{tier} retrieval rejected: {reason}")]
    RetrievalRejected { tier: String, reason: String },

    #[error("Invalid storage key: {0}")]
    InvalidStorageKey(String),

    #[error("Malformed message: {0}")]
    MalformedMessage(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Backend error: {0}")]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
