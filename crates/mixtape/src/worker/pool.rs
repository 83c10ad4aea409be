use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use log::{debug, error, info};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::broadcast::JobProgressTracker;
use crate::storage::ArchiveBuilder;
use crate::worker::job::{ItemReport, Job, JobCounts};
use crate::worker::processor::ItemProcessor;

/// Result of one pool run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSummary {
    pub dispatched: usize,
    pub counts: JobCounts,
}

/// Runs the items of one job with at most `worker_count` in flight.
pub struct WorkerPool {
    worker_count: usize,
    processor: Arc<ItemProcessor>,
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl WorkerPool {
    /// Creates a new worker pool.
    ///
    /// # Panics
    /// Panics if `worker_count` is 0.
    pub fn new(processor: Arc<ItemProcessor>, worker_count: usize) -> Self {
        assert!(worker_count > 0, "worker_count must be > 0");
        Self {
            worker_count,
            processor,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn processor(&self) -> &Arc<ItemProcessor> {
        &self.processor
    }

    /// Dispatch the job's items in index order and wait for every dispatched
    /// item to report. Stops dispatching once cancellation is observed.
    pub async fn run(
        &self,
        job: &Arc<Job>,
        archive: &ArchiveBuilder,
        tracker: &JobProgressTracker,
    ) -> PoolSummary {
        let semaphore = Arc::new(Semaphore::new(self.worker_count));
        let mut tasks = JoinSet::new();
        let mut dispatched = 0;

        info!(
            "Job {}: processing {} items with {} workers",
            job.id(),
            job.total(),
            self.worker_count
        );

        for item in job.items() {
            let permit = tokio::select! {
                biased;
                _ = job.cancel_token().cancelled() => break,
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            if job.is_cancel_requested() {
                break;
            }

            job.item_started(item.index);
            tracker.item_started(item);
            dispatched += 1;

            let processor = Arc::clone(&self.processor);
            let job = Arc::clone(job);
            let archive = archive.clone();
            let tracker = tracker.clone();
            let item = item.clone();

            tasks.spawn(async move {
                let _permit = permit;
                let outcome = AssertUnwindSafe(processor.process(&item, &job, &archive))
                    .catch_unwind()
                    .await;

                let report = match outcome {
                    Ok(report) => report,
                    Err(panic) => {
                        let message = panic_message(panic.as_ref());
                        error!(
                            "Job {}: item {} panicked: {}",
                            job.id(),
                            item.index,
                            message
                        );
                        let reason = format!("panicked: {}", message);
                        ItemReport::failed(&item, &item.display_name, reason)
                    }
                };

                if job.record_outcome(&report) {
                    tracker.item_finished(&report);
                }
            });
        }

        if job.is_cancel_requested() {
            debug!(
                "Job {}: cancellation observed after dispatching {} items",
                job.id(),
                dispatched
            );
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!("Job {}: item task failed: {}", job.id(), e);
            }
        }

        PoolSummary {
            dispatched,
            counts: job.counts(),
        }
    }
}
