//! Job failure types.

use thiserror::Error;

/// Error type for a failed job.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    /// Job failed due to invalid input
    #[error("Invalid entry: {message}")]
    InvalidEntry { message: String },

    /// A backend call made by the job failed
    #[error("Backend error: {message}")]
    Backend { message: String },

    /// The job panicked before producing a result
    #[error("Job {job} panicked")]
    Panicked { job: String },

    /// Internal error
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl TaskError {
    /// Creates an invalid entry error.
    pub fn invalid_entry(message: impl Into<String>) -> Self {
        TaskError::InvalidEntry {
            message: message.into(),
        }
    }

    /// Creates a backend error.
    pub fn backend(message: impl Into<String>) -> Self {
        TaskError::Backend {
            message: message.into(),
        }
    }

    /// Creates a panic error for the given job.
    pub fn panicked(job: impl Into<String>) -> Self {
        TaskError::Panicked { job: job.into() }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        TaskError::Internal {
            message: message.into(),
        }
    }

    /// Returns true if re-running the job may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TaskError::Backend { .. })
    }
}

/// Result type for job functions.
pub type TaskResult<T> = Result<T, TaskError>;
