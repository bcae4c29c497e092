// crates/jobs/src/service.rs
//! Registry of keyed background jobs.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::JobError;
use crate::job::{Job, Publisher};
use crate::subscription::Subscription;
use crate::types::JobSnapshot;

/// Registry of jobs keyed by caller-chosen strings.
///
/// Construct one and share it (`Arc<JobService>`) with every component that
/// starts or observes jobs. At most one live job exists per key; a key whose
/// job has completed may be started again.
#[derive(Debug, Default)]
pub struct JobService {
    jobs: RwLock<HashMap<String, Arc<Job>>>,
}

impl JobService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `work` under `key` and start it.
    ///
    /// The existence check, insert and start happen under one write lock, so
    /// concurrent calls for the same key run `work` exactly once. Every other
    /// caller gets `AlreadyExists` and can fetch the live job with `get_job`.
    pub fn start_job<F, Fut>(&self, key: impl Into<String>, work: F) -> Result<Arc<Job>, JobError>
    where
        F: FnOnce(Publisher) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (job, ()) = self.register(key.into(), work, |_| ())?;
        Ok(job)
    }

    /// Like `start_job`, but the caller is subscribed before the worker is
    /// spawned and so sees every update, however fast the worker is.
    pub fn start_job_and_subscribe<F, Fut>(
        &self,
        key: impl Into<String>,
        work: F,
    ) -> Result<(Arc<Job>, Subscription), JobError>
    where
        F: FnOnce(Publisher) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.register(key.into(), work, Job::subscribe)
    }

    pub fn get_job(&self, key: &str) -> Result<Arc<Job>, JobError> {
        self.read_jobs()
            .get(key)
            .cloned()
            .ok_or_else(|| JobError::not_found(key))
    }

    /// Subscribe to the job registered under `key`.
    pub fn subscribe(&self, key: &str) -> Result<Subscription, JobError> {
        Ok(self.get_job(key)?.subscribe())
    }

    /// Stop delivering updates to one subscriber.
    ///
    /// The job keeps running for everyone else. Stopping the same
    /// subscription again, after the job completed, or after the job was
    /// evicted and dropped, only closes the subscription.
    pub fn stop_subscription(&self, subscription: &mut Subscription) -> Result<(), JobError> {
        match subscription.job() {
            Some(job) => job.unsubscribe(subscription),
            None => {
                tracing::debug!(job_key = %subscription.job_key(), "Stopping subscription of a dropped job");
                subscription.close();
            }
        }
        Ok(())
    }

    fn register<F, Fut, T>(
        &self,
        key: String,
        work: F,
        before_start: impl FnOnce(&Arc<Job>) -> T,
    ) -> Result<(Arc<Job>, T), JobError>
    where
        F: FnOnce(Publisher) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut jobs = self.write_jobs();

        if let Some(existing) = jobs.get(&key) {
            if !existing.status().is_complete() {
                tracing::debug!(job_key = %key, "Job already exists");
                return Err(JobError::already_exists(key));
            }
            tracing::debug!(job_key = %key, "Replacing completed job");
        }

        let job = Job::new(key.clone(), work);
        let extra = before_start(&job);
        job.start()?;
        jobs.insert(key, Arc::clone(&job));
        Ok((job, extra))
    }

    /// Snapshots of every job that has not completed.
    pub fn active_jobs(&self) -> Vec<JobSnapshot> {
        self.read_jobs()
            .values()
            .map(|job| job.snapshot())
            .filter(|snap| !snap.status.is_complete())
            .collect()
    }

    /// Drop completed jobs from the registry. Returns how many were removed.
    pub fn remove_completed(&self) -> usize {
        let mut jobs = self.write_jobs();
        let before = jobs.len();
        jobs.retain(|_, job| !job.status().is_complete());
        let removed = before - jobs.len();
        if removed > 0 {
            tracing::debug!(removed, "Evicted completed jobs");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.read_jobs().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_jobs().is_empty()
    }

    fn read_jobs(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<Job>>> {
        match self.jobs.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("RwLock poisoned reading jobs map, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write_jobs(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<Job>>> {
        match self.jobs.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("RwLock poisoned writing jobs map, recovering");
                poisoned.into_inner()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::JobStatus;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_start_and_get_job() {
        let service = JobService::new();
        let job = service
            .start_job("test", |p| async move {
                p.publish("hello").await;
            })
            .unwrap();

        let fetched = service.get_job("test").unwrap();
        assert!(Arc::ptr_eq(&job, &fetched));
        job.wait_for_finish().await;
        assert_eq!(fetched.status(), JobStatus::Complete);
    }

    #[tokio::test]
    async fn test_duplicate_key_returns_already_exists() {
        let service = JobService::new();
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let first = service
            .start_job("test", |_p| async move {
                let _ = release_rx.await;
            })
            .unwrap();

        let err = service
            .start_job("test", |p| async move {
                p.publish("never runs").await;
            })
            .unwrap_err();
        assert_eq!(err, JobError::already_exists("test"));
        assert!(Arc::ptr_eq(&first, &service.get_job("test").unwrap()));

        release_tx.send(()).unwrap();
        first.wait_for_finish().await;
    }

    #[test]
    fn test_get_missing_job() {
        let service = JobService::new();
        assert_eq!(
            service.get_job("nope").unwrap_err(),
            JobError::not_found("nope")
        );
        assert!(service.subscribe("nope").is_err());
        assert!(service.is_empty());
    }

    #[tokio::test]
    async fn test_completed_key_can_be_restarted() {
        let service = JobService::new();
        let first = service
            .start_job("retry", |p| async move {
                p.publish("attempt 1").await;
            })
            .unwrap();
        first.wait_for_finish().await;

        let second = service
            .start_job("retry", |p| async move {
                p.publish("attempt 2").await;
            })
            .unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(&second, &service.get_job("retry").unwrap()));
        assert_eq!(service.len(), 1);
        second.wait_for_finish().await;
    }

    #[tokio::test]
    async fn test_stop_subscription_is_idempotent() {
        let service = JobService::new();
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let job = service
            .start_job("test", |p| async move {
                let _ = release_rx.await;
                p.publish("after").await;
            })
            .unwrap();
        let mut sub = service.subscribe("test").unwrap();
        assert_eq!(job.subscriber_count(), 1);

        service.stop_subscription(&mut sub).unwrap();
        service.stop_subscription(&mut sub).unwrap();
        assert_eq!(job.subscriber_count(), 0);

        release_tx.send(()).unwrap();
        job.wait_for_finish().await;
        service.stop_subscription(&mut sub).unwrap();
        assert_eq!(sub.recv().await, None);
    }

    #[test]
    fn test_stop_subscription_after_job_dropped() {
        let service = JobService::new();
        let job = Job::new("short", |_p| async {});
        let mut sub = job.subscribe();
        drop(job);

        service.stop_subscription(&mut sub).unwrap();
        assert!(sub.is_closed());
        service.stop_subscription(&mut sub).unwrap();
    }

    #[tokio::test]
    async fn test_stop_subscription_after_eviction() {
        let service = JobService::new();
        let (job, mut sub) = service
            .start_job_and_subscribe("evicted", |p| async move {
                p.publish("last").await;
            })
            .unwrap();
        job.wait_for_finish().await;
        assert_eq!(service.remove_completed(), 1);
        drop(job);

        service.stop_subscription(&mut sub).unwrap();
        assert_eq!(sub.recv().await, None);
    }

    #[tokio::test]
    async fn test_start_job_and_subscribe_sees_first_update() {
        let service = JobService::new();
        let (job, mut sub) = service
            .start_job_and_subscribe("eager", |p| async move {
                p.publish("first").await;
                p.publish("second").await;
            })
            .unwrap();

        assert_eq!(sub.collect_remaining().await, vec!["first", "second"]);
        assert!(Arc::ptr_eq(&job, &service.get_job("eager").unwrap()));
        job.wait_for_finish().await;
    }

    #[test]
    fn test_start_job_outside_runtime_registers_nothing() {
        let service = JobService::new();
        let err = service.start_job("offline", |_p| async {}).unwrap_err();
        assert_eq!(err, JobError::no_runtime("offline"));
        assert!(service.is_empty());

        let err = service
            .start_job_and_subscribe("offline", |_p| async {})
            .map(|_| ())
            .unwrap_err();
        assert_eq!(err, JobError::no_runtime("offline"));
        assert!(service.get_job("offline").is_err());
    }

    #[tokio::test]
    async fn test_active_jobs_and_remove_completed() {
        let service = JobService::new();
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let _running = service
            .start_job("running", |_p| async move {
                let _ = release_rx.await;
            })
            .unwrap();
        let done = service.start_job("done", |_p| async {}).unwrap();
        done.wait_for_finish().await;

        let active = service.active_jobs();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].key, "running");
        assert_eq!(active[0].status, JobStatus::Running);

        assert_eq!(service.remove_completed(), 1);
        assert_eq!(service.len(), 1);
        assert!(service.get_job("done").is_err());

        release_tx.send(()).unwrap();
    }

    #[test]
    fn test_job_service_default() {
        let service = JobService::default();
        assert!(service.active_jobs().is_empty());
        assert_eq!(service.len(), 0);
    }
}
