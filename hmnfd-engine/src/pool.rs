//! Bounded worker pool for SCN delivery.
//!
//! A fixed set of worker tasks drains one bounded job queue. Submission is
//! non-blocking (`try_submit`); the dispatcher owns the retry policy for a
//! full queue. Job status is observable through a watch channel, which is
//! what the fan-out-sync test hook and the cancellation path build on.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tracing::info;

use hmnfd_core::Scn;

use crate::delivery::Deliverer;

/// Default number of worker tasks.
pub const DEFAULT_WORKERS: usize = 500;
/// Default job queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

/// Lifecycle of a delivery job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    /// Created but not yet queued.
    Default,
    /// Waiting in the job queue.
    Queued,
    /// Delivered successfully.
    Complete,
    /// Failed; the error slot holds the reason.
    Error,
    /// Cancelled before a worker picked it up.
    Cancelled,
}

impl JobStatus {
    /// True for states a job can never leave.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Error | Self::Cancelled)
    }
}

/// One SCN delivery to one subscriber.
pub struct ScnSendJob {
    /// The per-subscriber notification payload.
    pub scn: Scn,
    /// Subscriber identity (owner or `agent@owner`).
    pub subscriber: String,
    /// Delivery URL.
    pub url: String,
    status: watch::Sender<JobStatus>,
    error: Mutex<Option<String>>,
}

impl ScnSendJob {
    /// Creates a job in the `Default` state.
    #[must_use]
    pub fn new(scn: Scn, subscriber: impl Into<String>, url: impl Into<String>) -> Arc<Self> {
        let (status, _) = watch::channel(JobStatus::Default);
        Arc::new(Self {
            scn,
            subscriber: subscriber.into(),
            url: url.into(),
            status,
            error: Mutex::new(None),
        })
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> JobStatus {
        *self.status.borrow()
    }

    /// Last error message, when the job failed.
    #[must_use]
    pub fn error(&self) -> Option<String> {
        self.error.lock().clone()
    }

    /// Marks the job failed with a reason.
    pub fn fail(&self, reason: impl Into<String>) {
        *self.error.lock() = Some(reason.into());
        let _ = self.status.send(JobStatus::Error);
    }

    /// Cancels the job if it has not started running. Returns the status
    /// after the attempt; running jobs are unaffected.
    pub fn cancel(&self) -> JobStatus {
        self.status.send_if_modified(|status| {
            if matches!(status, JobStatus::Default | JobStatus::Queued) {
                *status = JobStatus::Cancelled;
                true
            } else {
                false
            }
        });
        self.status()
    }

    /// Waits until the job reaches a terminal status.
    pub async fn wait_terminal(&self) -> JobStatus {
        let mut rx = self.status.subscribe();
        loop {
            let status = *rx.borrow_and_update();
            if status.is_terminal() {
                return status;
            }
            if rx.changed().await.is_err() {
                return self.status();
            }
        }
    }

    pub(crate) fn set_status(&self, status: JobStatus) {
        let _ = self.status.send(status);
    }

    /// `Default` -> `Queued`, leaving any other state untouched.
    fn mark_queued(&self) {
        self.status.send_if_modified(|status| {
            if matches!(status, JobStatus::Default) {
                *status = JobStatus::Queued;
                true
            } else {
                false
            }
        });
    }

    /// `Queued` -> `Default`, for a failed submission.
    fn unmark_queued(&self) {
        self.status.send_if_modified(|status| {
            if matches!(status, JobStatus::Queued) {
                *status = JobStatus::Default;
                true
            } else {
                false
            }
        });
    }
}

/// Fixed pool of worker tasks over a bounded job queue.
pub struct WorkerPool {
    tx: mpsc::Sender<Arc<ScnSendJob>>,
    workers: usize,
    capacity: usize,
}

impl WorkerPool {
    /// Spawns `workers` tasks draining a queue of `capacity` slots; each
    /// job runs through the given deliverer.
    #[must_use]
    pub fn new(workers: usize, capacity: usize, deliverer: Arc<Deliverer>) -> Arc<Self> {
        let (tx, rx) = mpsc::channel::<Arc<ScnSendJob>>(capacity);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        for _ in 0..workers {
            let rx = rx.clone();
            let deliverer = deliverer.clone();
            tokio::spawn(async move {
                loop {
                    let job = { rx.lock().await.recv().await };
                    let Some(job) = job else { break };
                    if job.status() == JobStatus::Cancelled {
                        continue;
                    }
                    deliverer.deliver(&job).await;
                }
            });
        }

        info!(workers, capacity, "delivery worker pool started");
        Arc::new(Self {
            tx,
            workers,
            capacity,
        })
    }

    /// Attempts to queue a job without blocking. On success the job moves
    /// to `Queued`; returns false when the queue is full.
    ///
    /// The status flips before the enqueue: a worker may legitimately
    /// finish the job before this function returns.
    pub fn try_submit(&self, job: &Arc<ScnSendJob>) -> bool {
        job.mark_queued();
        if self.tx.try_send(job.clone()).is_ok() {
            true
        } else {
            job.unmark_queued();
            false
        }
    }

    /// Number of worker tasks.
    #[must_use]
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Jobs currently waiting in the queue.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.capacity - self.tx.capacity()
    }
}
