// crates/jobs/src/subscription.rs
//! A single consumer's view of a job's update stream.

use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use futures_util::Stream;
use tokio::sync::mpsc;

use crate::job::Job;
use crate::types::SubscriptionId;

/// Capacity of each subscriber's channel. A full channel makes the
/// job's broadcaster wait, which delays delivery to every other subscriber.
pub const SUBSCRIPTION_BUFFER: usize = 8;

/// Handle returned by `Job::subscribe`.
///
/// Updates arrive in the order the worker published them. The stream ends
/// (`recv` returns `None`) when the job completes or after an unsubscribe.
/// Dropping the handle without unsubscribing is fine: the job prunes it on
/// its next update.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    job_key: String,
    rx: mpsc::Receiver<String>,
    job: Weak<Job>,
    closed: bool,
}

impl Subscription {
    pub(crate) fn new(
        id: SubscriptionId,
        job_key: String,
        rx: mpsc::Receiver<String>,
        job: Weak<Job>,
    ) -> Self {
        Self {
            id,
            job_key,
            rx,
            job,
            closed: false,
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Key of the job this subscription observes.
    pub fn job_key(&self) -> &str {
        &self.job_key
    }

    /// The job this subscription belongs to, if it is still alive.
    pub fn job(&self) -> Option<Arc<Job>> {
        self.job.upgrade()
    }

    /// Whether this handle was closed by an unsubscribe.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Wait for the next update. `None` once the stream has ended.
    pub async fn recv(&mut self) -> Option<String> {
        if self.closed {
            return None;
        }
        self.rx.recv().await
    }

    /// Non-blocking receive.
    pub fn try_recv(&mut self) -> Result<String, mpsc::error::TryRecvError> {
        if self.closed {
            return Err(mpsc::error::TryRecvError::Disconnected);
        }
        self.rx.try_recv()
    }

    /// Collect every remaining update until the stream ends.
    pub async fn collect_remaining(&mut self) -> Vec<String> {
        let mut updates = Vec::new();
        while let Some(update) = self.recv().await {
            updates.push(update);
        }
        updates
    }

    /// Close the receiving side and discard anything still buffered.
    /// Safe to call any number of times.
    pub(crate) fn close(&mut self) {
        self.closed = true;
        self.rx.close();
        while self.rx.try_recv().is_ok() {}
    }
}

impl Stream for Subscription {
    type Item = String;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<String>> {
        let this = self.get_mut();
        if this.closed {
            return Poll::Ready(None);
        }
        this.rx.poll_recv(cx)
    }
}
