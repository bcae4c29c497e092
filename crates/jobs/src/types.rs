// crates/jobs/src/types.rs
//! Types for the background job system.

use std::fmt;

use serde::Serialize;

/// Unique identifier for one call to `subscribe`.
pub type SubscriptionId = u64;

/// Status of a background job.
///
/// Ordered: a job only ever moves forward through these values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Initialized = 0,
    Running = 1,
    Complete = 2,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Initialized => "initialized",
            JobStatus::Running => "running",
            JobStatus::Complete => "complete",
        }
    }

    pub fn is_complete(self) -> bool {
        self == JobStatus::Complete
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of a job, for status queries.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub key: String,
    pub status: JobStatus,
    pub subscribers: usize,
    pub created_at: String,
}
