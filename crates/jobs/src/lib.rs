// crates/jobs/src/lib.rs
//! Background job system for long-running, progress-reporting tasks.
//!
//! Provides:
//! - `JobService`: registry of keyed jobs, started at most once per key
//! - `Job`: a single unit of work plus fan-out of its updates
//! - `Subscription`: one consumer's live view of a job's update stream
//! - `Publisher`: the worker's side of the update stream

pub mod error;
pub mod job;
pub mod service;
pub mod subscription;
pub mod types;

pub use error::JobError;
pub use job::{Job, Publisher, PUBLISH_BUFFER};
pub use service::JobService;
pub use subscription::{Subscription, SUBSCRIPTION_BUFFER};
pub use types::{JobSnapshot, JobStatus, SubscriptionId};
