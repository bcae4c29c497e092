// crates/jobs/src/job.rs
//! A single background job and the fan-out of its updates.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::error::JobError;
use crate::subscription::{Subscription, SUBSCRIPTION_BUFFER};
use crate::types::{JobSnapshot, JobStatus, SubscriptionId};

/// Capacity of the channel between the worker and the broadcaster.
pub const PUBLISH_BUFFER: usize = 1;

type Work = Box<dyn FnOnce(Publisher) -> BoxFuture<'static, ()> + Send>;

/// The worker's handle for emitting progress updates.
#[derive(Debug, Clone)]
pub struct Publisher {
    tx: mpsc::Sender<String>,
}

impl Publisher {
    /// Publish one update to every current subscriber.
    ///
    /// Waits while the broadcaster is busy delivering the previous update.
    /// Returns `false` if the job can no longer deliver updates, which is the
    /// case for clones still held after the worker returned.
    pub async fn publish(&self, update: impl Into<String>) -> bool {
        self.tx.send(update.into()).await.is_ok()
    }
}

#[derive(Default)]
struct Subscribers {
    senders: HashMap<SubscriptionId, mpsc::Sender<String>>,
    /// Set once the job completes; later subscriptions start out closed.
    closed: bool,
}

/// A named unit of work, run at most once, observable by many subscribers.
///
/// Two tasks back a started job: the worker, and a broadcaster that copies
/// each update into every subscriber's channel in publish order. Delivery is
/// sequential, so a subscriber that stops reading while its channel is full
/// holds up the others until it reads, unsubscribes or is dropped.
pub struct Job {
    key: String,
    created_at: DateTime<Utc>,
    work: Mutex<Option<Work>>,
    status: watch::Sender<JobStatus>,
    subscribers: Mutex<Subscribers>,
    next_subscription_id: AtomicU64,
}

impl Job {
    /// Create a job that has not been started yet.
    pub fn new<F, Fut>(key: impl Into<String>, work: F) -> Arc<Self>
    where
        F: FnOnce(Publisher) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (status, _) = watch::channel(JobStatus::Initialized);
        let work: Work = Box::new(move |publisher| work(publisher).boxed());
        Arc::new(Self {
            key: key.into(),
            created_at: Utc::now(),
            work: Mutex::new(Some(work)),
            status,
            subscribers: Mutex::new(Subscribers::default()),
            next_subscription_id: AtomicU64::new(1),
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Spawn the worker and its broadcaster on the current tokio runtime.
    ///
    /// Returns `AlreadyStarted` on every call after the first, and
    /// `NoRuntime` without touching the job when called outside a runtime.
    pub fn start(self: &Arc<Self>) -> Result<(), JobError> {
        let runtime = Handle::try_current().map_err(|_| JobError::no_runtime(&self.key))?;
        let work = self
            .lock_work()
            .take()
            .ok_or_else(|| JobError::AlreadyStarted {
                key: self.key.clone(),
            })?;

        self.advance_status(JobStatus::Running);
        tracing::info!(job_key = %self.key, "Job started");

        let (tx, rx) = mpsc::channel(PUBLISH_BUFFER);
        let worker = runtime.spawn(work(Publisher { tx }));
        runtime.spawn(Arc::clone(self).broadcast(rx, worker));
        Ok(())
    }

    /// Register a new subscriber.
    ///
    /// Only updates published after this call are delivered. If the job has
    /// already completed the returned stream is empty and already ended.
    pub fn subscribe(self: &Arc<Self>) -> Subscription {
        let id = self.next_subscription_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);

        let mut subs = self.lock_subscribers();
        if subs.closed {
            drop(tx);
            tracing::debug!(job_key = %self.key, subscription_id = id, "Subscribed to completed job");
        } else {
            subs.senders.insert(id, tx);
            tracing::debug!(
                job_key = %self.key,
                subscription_id = id,
                subscribers = subs.senders.len(),
                "Subscription added"
            );
        }
        drop(subs);

        Subscription::new(id, self.key.clone(), rx, Arc::downgrade(self))
    }

    /// Remove a subscriber and close its stream.
    ///
    /// Idempotent, and harmless after the job has completed. Other
    /// subscribers and the worker are unaffected.
    pub fn unsubscribe(&self, subscription: &mut Subscription) {
        let owned = subscription
            .job()
            .is_some_and(|job| std::ptr::eq(Arc::as_ptr(&job), self));
        if owned {
            let removed = self
                .lock_subscribers()
                .senders
                .remove(&subscription.id())
                .is_some();
            if removed {
                tracing::debug!(
                    job_key = %self.key,
                    subscription_id = subscription.id(),
                    "Subscription removed"
                );
            }
        }
        subscription.close();
    }

    pub fn status(&self) -> JobStatus {
        *self.status.borrow()
    }

    /// Wait until the worker has returned and every subscription is closed.
    ///
    /// Never resolves for a job that is not started.
    pub async fn wait_for_finish(&self) {
        let mut rx = self.status.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|status| status.is_complete()).await;
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock_subscribers().senders.len()
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            key: self.key.clone(),
            status: self.status(),
            subscribers: self.subscriber_count(),
            created_at: self.created_at.to_rfc3339(),
        }
    }

    /// Forward updates until the worker returns, then complete the job.
    ///
    /// Publishers the worker cloned into other tasks may outlive it, so the
    /// worker's return ends the job, not the publish channel closing.
    async fn broadcast(self: Arc<Self>, mut updates: mpsc::Receiver<String>, mut worker: JoinHandle<()>) {
        let outcome = loop {
            tokio::select! {
                biased;
                update = updates.recv() => match update {
                    Some(update) => self.deliver(update).await,
                    None => break (&mut worker).await,
                },
                outcome = &mut worker => {
                    // Leftover publishers get `false` from now on.
                    updates.close();
                    while let Ok(update) = updates.try_recv() {
                        self.deliver(update).await;
                    }
                    break outcome;
                }
            }
        };

        if let Err(e) = outcome {
            tracing::error!(job_key = %self.key, error = %e, "Job worker did not finish cleanly");
        }
        self.finish();
    }

    async fn deliver(&self, update: String) {
        for (id, tx) in self.current_subscribers() {
            if tx.send(update.clone()).await.is_err() {
                // Receiver dropped or unsubscribed mid-delivery.
                self.lock_subscribers().senders.remove(&id);
            }
        }
    }

    fn finish(&self) {
        let closed = {
            let mut subs = self.lock_subscribers();
            subs.closed = true;
            let count = subs.senders.len();
            subs.senders.clear();
            count
        };
        self.advance_status(JobStatus::Complete);
        tracing::info!(job_key = %self.key, subscriptions_closed = closed, "Job complete");
    }

    fn current_subscribers(&self) -> Vec<(SubscriptionId, mpsc::Sender<String>)> {
        self.lock_subscribers()
            .senders
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect()
    }

    fn advance_status(&self, next: JobStatus) {
        self.status.send_if_modified(|status| {
            if *status < next {
                *status = next;
                true
            } else {
                false
            }
        });
    }

    fn lock_subscribers(&self) -> MutexGuard<'_, Subscribers> {
        match self.subscribers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!(job_key = %self.key, "Mutex poisoned on subscribers, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn lock_work(&self) -> MutexGuard<'_, Option<Work>> {
        match self.work.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!(job_key = %self.key, "Mutex poisoned on work, recovering");
                poisoned.into_inner()
            }
        }
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("key", &self.key)
            .field("status", &self.status())
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}
