//! Job progress broadcaster for real-time job status streaming.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::Instant;

use crate::worker::job::{ItemOutcome, ItemReport, Job, JobStatus, JobWatch, WorkItem};

/// Kind of progress event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobEventKind {
    Queued,
    TotalKnown,
    ItemStarted,
    ItemSucceeded,
    ItemFailed,
    ItemCancelled,
    JobDone,
    JobCancelled,
    JobError,
    Heartbeat,
}

impl JobEventKind {
    /// Terminal events end a job's stream.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobEventKind::JobDone | JobEventKind::JobCancelled | JobEventKind::JobError
        )
    }

    /// Event name used on the wire (SSE `event:` field).
    pub fn as_str(self) -> &'static str {
        match self {
            JobEventKind::Queued => "queued",
            JobEventKind::TotalKnown => "total_known",
            JobEventKind::ItemStarted => "item_started",
            JobEventKind::ItemSucceeded => "item_succeeded",
            JobEventKind::ItemFailed => "item_failed",
            JobEventKind::ItemCancelled => "item_cancelled",
            JobEventKind::JobDone => "job_done",
            JobEventKind::JobCancelled => "job_cancelled",
            JobEventKind::JobError => "job_error",
            JobEventKind::Heartbeat => "heartbeat",
        }
    }
}

impl std::fmt::Display for JobEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress event for a job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JobProgressEvent {
    /// Unique job identifier.
    pub job_id: String,
    pub kind: JobEventKind,
    /// Job status when the event was built.
    pub status: JobStatus,
    pub timestamp: DateTime<Utc>,
    pub total: usize,
    pub completed: usize,
    pub skipped: usize,
    pub cancelled: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_name: Option<String>,
    /// Error message (item failure reason or job error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Archive file name, set on terminal events when a download exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_position: Option<usize>,
}

impl JobProgressEvent {
    /// Creates an event carrying the job's current counters.
    pub fn from_job(kind: JobEventKind, job: &Job) -> Self {
        let counts = job.counts();
        Self {
            job_id: job.id().to_string(),
            kind,
            status: job.status(),
            timestamp: Utc::now(),
            total: counts.total,
            completed: counts.completed,
            skipped: counts.skipped,
            cancelled: counts.cancelled,
            item_index: None,
            item_name: None,
            error: None,
            archive_name: None,
            queue_position: None,
        }
    }

    pub fn with_item(mut self, index: usize, name: impl Into<String>) -> Self {
        self.item_index = Some(index);
        self.item_name = Some(name.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_archive(mut self, archive_name: impl Into<String>) -> Self {
        self.archive_name = Some(archive_name.into());
        self
    }

    pub fn with_queue_position(mut self, position: usize) -> Self {
        self.queue_position = Some(position);
        self
    }

    /// Terminal event matching the job's current status, if it has one.
    pub fn terminal_for(job: &Job) -> Option<Self> {
        match job.status() {
            JobStatus::Completed => {
                Some(Self::from_job(JobEventKind::JobDone, job).with_archive(job.archive_name()))
            }
            JobStatus::Cancelled => {
                let event = Self::from_job(JobEventKind::JobCancelled, job);
                Some(match job.ready_archive() {
                    Some(_) => event.with_archive(job.archive_name()),
                    None => event,
                })
            }
            JobStatus::Error => {
                let event = Self::from_job(JobEventKind::JobError, job);
                Some(match job.error() {
                    Some(error) => event.with_error(error),
                    None => event,
                })
            }
            JobStatus::Queued | JobStatus::Processing => None,
        }
    }
}

/// Broadcasts job progress events for streaming.
#[derive(Clone)]
pub struct JobProgressBroadcaster {
    sender: Arc<broadcast::Sender<JobProgressEvent>>,
}

impl JobProgressBroadcaster {
    /// Creates a new job progress broadcaster with the specified channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Sends a progress event to all subscribers.
    pub fn send(&self, event: JobProgressEvent) {
        // Ignore errors - no active receivers is fine
        let _ = self.sender.send(event);
    }

    /// Creates a new subscriber for progress events of all jobs.
    pub fn subscribe(&self) -> broadcast::Receiver<JobProgressEvent> {
        self.sender.subscribe()
    }

    /// Creates a progress tracker bound to one job.
    pub fn tracker(&self, job: Arc<Job>) -> JobProgressTracker {
        JobProgressTracker {
            job,
            sender: Arc::clone(&self.sender),
        }
    }

    /// Stream of events for one job, with a heartbeat after every
    /// `heartbeat` of silence. Ends after the job's terminal event.
    ///
    /// Subscribes before inspecting the job, so no event published after this
    /// call is missed. If the job is already terminal the stream is empty.
    pub fn job_events(
        &self,
        job: Arc<Job>,
        heartbeat: Duration,
    ) -> BoxStream<'static, JobProgressEvent> {
        job_event_stream(self.subscribe(), job, heartbeat)
    }
}

impl Default for JobProgressBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Tracks progress for a single job.
#[derive(Clone)]
pub struct JobProgressTracker {
    job: Arc<Job>,
    sender: Arc<broadcast::Sender<JobProgressEvent>>,
}

impl JobProgressTracker {
    fn emit(&self, event: JobProgressEvent) {
        let _ = self.sender.send(event);
    }

    pub fn job(&self) -> &Arc<Job> {
        &self.job
    }

    pub fn queued(&self, position: usize) {
        self.emit(
            JobProgressEvent::from_job(JobEventKind::Queued, &self.job)
                .with_queue_position(position),
        );
    }

    pub fn total_known(&self) {
        self.emit(JobProgressEvent::from_job(JobEventKind::TotalKnown, &self.job));
    }

    pub fn item_started(&self, item: &WorkItem) {
        self.emit(
            JobProgressEvent::from_job(JobEventKind::ItemStarted, &self.job)
                .with_item(item.index, &item.display_name),
        );
    }

    pub fn item_finished(&self, report: &ItemReport) {
        let kind = match report.outcome {
            ItemOutcome::Succeeded => JobEventKind::ItemSucceeded,
            ItemOutcome::Failed => JobEventKind::ItemFailed,
            ItemOutcome::Cancelled => JobEventKind::ItemCancelled,
            ItemOutcome::Pending => return,
        };
        let event =
            JobProgressEvent::from_job(kind, &self.job).with_item(report.index, &report.name);
        self.emit(match &report.detail {
            Some(reason) => event.with_error(reason),
            None => event,
        });
    }

    /// Emits the terminal event for the job's current status.
    pub fn finished(&self) {
        match JobProgressEvent::terminal_for(&self.job) {
            Some(event) => self.emit(event),
            None => log::warn!(
                "Job {}: finish reported while still {}",
                self.job.id(),
                self.job.status()
            ),
        }
    }
}

struct StreamState {
    rx: broadcast::Receiver<JobProgressEvent>,
    // Marks the job as watched until the stream is dropped
    watch: JobWatch,
    heartbeat: Duration,
    done: bool,
}

impl StreamState {
    fn job(&self) -> &Arc<Job> {
        self.watch.job()
    }

    fn yield_event(mut self, event: JobProgressEvent) -> Option<(JobProgressEvent, Self)> {
        self.done = event.kind.is_terminal();
        self.job().touch();
        Some((event, self))
    }
}

fn job_event_stream(
    rx: broadcast::Receiver<JobProgressEvent>,
    job: Arc<Job>,
    heartbeat: Duration,
) -> BoxStream<'static, JobProgressEvent> {
    let done = job.status().is_terminal();
    let state = StreamState {
        rx,
        watch: job.watch(),
        heartbeat,
        done,
    };

    stream::unfold(state, |mut state| async move {
        if state.done {
            return None;
        }

        let deadline = Instant::now() + state.heartbeat;
        loop {
            match tokio::time::timeout_at(deadline, state.rx.recv()).await {
                Ok(Ok(event)) if event.job_id == state.job().id() => {
                    return state.yield_event(event);
                }
                // Another job's event
                Ok(Ok(_)) => continue,
                Ok(Err(RecvError::Lagged(missed))) => {
                    log::warn!(
                        "Job {}: progress subscriber lagged by {} events",
                        state.job().id(),
                        missed
                    );
                    // The terminal event may be among the missed ones
                    if let Some(event) = JobProgressEvent::terminal_for(state.job()) {
                        return state.yield_event(event);
                    }
                }
                Ok(Err(RecvError::Closed)) => return None,
                Err(_) => {
                    let event = JobProgressEvent::terminal_for(state.job()).unwrap_or_else(|| {
                        JobProgressEvent::from_job(JobEventKind::Heartbeat, state.job())
                    });
                    return state.yield_event(event);
                }
            }
        }
    })
    .boxed()
}
