// crates/jobs/src/error.rs
use thiserror::Error;

/// Errors returned synchronously by the job registry.
///
/// Failures inside a running worker never show up here; they are published
/// on the job's update stream instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    #[error("job already exists: {key}")]
    AlreadyExists { key: String },

    #[error("job not found: {key}")]
    NotFound { key: String },

    #[error("job already started: {key}")]
    AlreadyStarted { key: String },

    #[error("no tokio runtime to start job: {key}")]
    NoRuntime { key: String },
}

impl JobError {
    pub fn already_exists(key: impl Into<String>) -> Self {
        Self::AlreadyExists { key: key.into() }
    }

    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    pub fn no_runtime(key: impl Into<String>) -> Self {
        Self::NoRuntime { key: key.into() }
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_error_display() {
        assert_eq!(
            JobError::already_exists("test").to_string(),
            "job already exists: test"
        );
        assert_eq!(JobError::not_found("gone").to_string(), "job not found: gone");
        assert_eq!(
            JobError::no_runtime("idle").to_string(),
            "no tokio runtime to start job: idle"
        );
    }

    #[test]
    fn test_is_already_exists() {
        assert!(JobError::already_exists("k").is_already_exists());
        assert!(!JobError::not_found("k").is_already_exists());
    }
}
