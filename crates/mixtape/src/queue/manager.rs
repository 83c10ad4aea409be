//! Single-active-job queue.
//!
//! At most one job is `processing`. Further submissions wait in a FIFO and
//! are activated one by one as the active job reaches a terminal status.

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::FutureExt;
use log::{error, info, warn};
use tracing::{info_span, Instrument};

use crate::broadcast::{JobProgressBroadcaster, JobProgressTracker};
use crate::error::QueueError;
use crate::queue::registry::JobRegistry;
use crate::storage::{ArchiveBuilder, WorkLayout};
use crate::worker::{Job, JobSnapshot, JobStatus, WorkerPool};

#[derive(Default)]
struct QueueState {
    active: Option<Arc<Job>>,
    pending: VecDeque<Arc<Job>>,
}

struct Shared {
    registry: Arc<JobRegistry>,
    pool: WorkerPool,
    broadcaster: JobProgressBroadcaster,
    layout: WorkLayout,
    estimated_item_secs: u64,
    state: Mutex<QueueState>,
}

/// Admits jobs, runs them one at a time and answers position/wait queries.
///
/// Cheap to clone; all clones share one queue.
#[derive(Clone)]
pub struct QueueManager {
    shared: Arc<Shared>,
}

impl QueueManager {
    pub fn new(
        registry: Arc<JobRegistry>,
        pool: WorkerPool,
        broadcaster: JobProgressBroadcaster,
        layout: WorkLayout,
        estimated_item_secs: u64,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                registry,
                pool,
                broadcaster,
                layout,
                estimated_item_secs,
                state: Mutex::new(QueueState::default()),
            }),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        match self.shared.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Queue state lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.shared.registry
    }

    pub fn broadcaster(&self) -> &JobProgressBroadcaster {
        &self.shared.broadcaster
    }

    pub fn layout(&self) -> &WorkLayout {
        &self.shared.layout
    }

    // ─── Admission ──────────────────────────────────────────────────────────

    /// Register `job` and either activate it (position 0) or append it to
    /// the FIFO (1-based position).
    pub fn submit(&self, job: Job) -> (Arc<Job>, usize) {
        let job = Arc::new(job);
        self.shared.registry.insert(Arc::clone(&job));

        let position = {
            let mut state = self.lock_state();
            if state.active.is_none() && job.activate() {
                state.active = Some(Arc::clone(&job));
                0
            } else {
                state.pending.push_back(Arc::clone(&job));
                state.pending.len()
            }
        };

        info!(
            "Job {} submitted with {} items at queue position {}",
            job.id(),
            job.total(),
            position
        );
        self.tracker(&job).queued(position);

        if position == 0 {
            self.spawn_run(Arc::clone(&job));
        }
        (job, position)
    }

    /// Register `job` directly in `error` without queueing it, so callers can
    /// look up why it never ran.
    pub fn reject(&self, job: Job, message: impl Into<String>) -> Arc<Job> {
        let job = Arc::new(job);
        let message = message.into();
        self.shared.registry.insert(Arc::clone(&job));
        job.fail(message.as_str());
        warn!("Job {} rejected at submission: {}", job.id(), message);
        self.tracker(&job).finished();
        job
    }

    /// Cancel a job.
    ///
    /// Queued jobs are dequeued and become `cancelled` immediately. The active
    /// job gets its cancellation flag set and winds down cooperatively.
    /// Terminal jobs are left alone. Returns the job's resulting status.
    pub fn cancel(&self, id: &str) -> Result<JobStatus, QueueError> {
        let job = self
            .shared
            .registry
            .get(id)
            .ok_or_else(|| QueueError::JobNotFound(id.to_string()))?;
        job.touch();

        let dequeued = {
            let mut state = self.lock_state();
            match state.pending.iter().position(|j| j.id() == id) {
                Some(index) => {
                    let removed = state.pending.remove(index);
                    job.request_cancel();
                    job.transition(JobStatus::Cancelled);
                    removed
                }
                None => None,
            }
        };

        if dequeued.is_some() {
            info!("Job {} cancelled while queued", id);
            self.tracker(&job).finished();
            self.announce_positions();
            return Ok(job.status());
        }

        let status = job.status();
        if status.is_terminal() {
            return Ok(status);
        }

        info!("Cancellation requested for job {}", id);
        job.request_cancel();
        Ok(job.status())
    }

    // ─── Queries ────────────────────────────────────────────────────────────

    pub fn active_job(&self) -> Option<Arc<Job>> {
        self.lock_state().active.clone()
    }

    pub fn is_active(&self, id: &str) -> bool {
        self.lock_state()
            .active
            .as_ref()
            .is_some_and(|job| job.id() == id)
    }

    pub fn pending_len(&self) -> usize {
        self.lock_state().pending.len()
    }

    /// 0 for the active job, 1-based FIFO place for queued jobs, `None` otherwise.
    pub fn queue_position(&self, id: &str) -> Option<usize> {
        let state = self.lock_state();
        Self::position_in(&state, id)
    }

    fn position_in(state: &QueueState, id: &str) -> Option<usize> {
        if state.active.as_ref().is_some_and(|job| job.id() == id) {
            return Some(0);
        }
        state
            .pending
            .iter()
            .position(|job| job.id() == id)
            .map(|index| index + 1)
    }

    /// Estimated seconds until a queued job starts: remaining items of the
    /// active job plus all items of jobs ahead of it, spread over the pool.
    pub fn estimated_wait(&self, id: &str) -> Option<u64> {
        let state = self.lock_state();
        self.wait_in(&state, id)
    }

    fn wait_in(&self, state: &QueueState, id: &str) -> Option<u64> {
        let index = state.pending.iter().position(|job| job.id() == id)?;

        let active_remaining = state.active.as_ref().map_or(0, |job| {
            let counts = job.counts();
            counts
                .total
                .saturating_sub(counts.completed + counts.skipped + counts.cancelled)
        });
        let ahead: usize = state
            .pending
            .iter()
            .take(index)
            .map(|job| job.total())
            .sum();

        let item_secs = (active_remaining + ahead) as u64 * self.shared.estimated_item_secs;
        let workers = self.shared.pool.worker_count() as u64;
        Some(item_secs.div_ceil(workers))
    }

    /// Snapshot of a job, refreshing its activity timestamp.
    pub fn status(&self, id: &str) -> Result<JobSnapshot, QueueError> {
        let job = self
            .shared
            .registry
            .get(id)
            .ok_or_else(|| QueueError::JobNotFound(id.to_string()))?;
        job.touch();

        let state = self.lock_state();
        let position = Self::position_in(&state, id);
        let wait = self.wait_in(&state, id);
        Ok(job.snapshot(position, wait))
    }

    // ─── Execution ──────────────────────────────────────────────────────────

    fn tracker(&self, job: &Arc<Job>) -> JobProgressTracker {
        self.shared.broadcaster.tracker(Arc::clone(job))
    }

    fn announce_positions(&self) {
        let pending: Vec<Arc<Job>> = self.lock_state().pending.iter().cloned().collect();
        for (index, job) in pending.iter().enumerate() {
            self.tracker(job).queued(index + 1);
        }
    }

    fn spawn_run(&self, job: Arc<Job>) {
        let manager = self.clone();
        tokio::spawn(async move {
            let run = AssertUnwindSafe(manager.run_job(&job)).catch_unwind().await;
            if run.is_err() {
                error!("Job {} panicked while processing", job.id());
                if job.fail("internal error while processing job") {
                    manager.tracker(&job).finished();
                }
            }
            manager.advance(&job);
        });
    }

    async fn run_job(&self, job: &Arc<Job>) {
        let span = info_span!("job", job_id = %job.id(), total = job.total());
        async {
            let tracker = self.tracker(job);
            self.execute(job, &tracker).await;
            tracker.finished();
        }
        .instrument(span)
        .await
    }

    async fn execute(&self, job: &Arc<Job>, tracker: &JobProgressTracker) {
        if job.is_cancel_requested() {
            info!("Job {} cancelled before it started", job.id());
            job.finish();
            return;
        }

        let job_dir = self.shared.layout.job_dir(job.id());
        if let Err(e) = tokio::fs::create_dir_all(&job_dir).await {
            let err = QueueError::WorkDirectory {
                path: job_dir,
                source: e,
            };
            error!("Job {}: {}", job.id(), err);
            job.fail(err.to_string());
            return;
        }

        let archive_path = self.shared.layout.archive_path(job.id(), job.archive_name());
        let archive = match ArchiveBuilder::create(&archive_path).await {
            Ok(archive) => archive,
            Err(e) => {
                error!("Job {}: {}", job.id(), e);
                job.fail(e.to_string());
                return;
            }
        };
        job.attach_archive(archive.path());
        tracker.total_known();

        let summary = self.shared.pool.run(job, &archive, tracker).await;
        archive.finalize().await;
        let status = job.finish();

        info!(
            "Job {} {}: {} dispatched, {} completed, {} skipped, {} cancelled",
            job.id(),
            status,
            summary.dispatched,
            summary.counts.completed,
            summary.counts.skipped,
            summary.counts.cancelled
        );
    }

    /// Clear `finished` from the active slot and start the next pending job.
    fn advance(&self, finished: &Arc<Job>) {
        let next = {
            let mut state = self.lock_state();
            if state
                .active
                .as_ref()
                .is_some_and(|job| Arc::ptr_eq(job, finished))
            {
                state.active = None;
            }

            let mut next = None;
            if state.active.is_none() {
                while let Some(candidate) = state.pending.pop_front() {
                    // Skips jobs that were cancelled or failed while queued
                    if candidate.activate() {
                        state.active = Some(Arc::clone(&candidate));
                        next = Some(candidate);
                        break;
                    }
                }
            }
            next
        };

        if let Some(job) = next {
            info!("Activating queued job {}", job.id());
            self.tracker(&job).queued(0);
            self.announce_positions();
            self.spawn_run(job);
        }
    }
}
