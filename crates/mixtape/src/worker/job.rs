use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::storage::archive_file_name;

// ─── Status ─────────────────────────────────────────────────────────────────

/// Lifecycle of a job. `Completed`, `Cancelled` and `Error` are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Cancelled,
    Error,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Cancelled | JobStatus::Error
        )
    }

    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Queued, Processing)
                | (Queued, Cancelled)
                | (Queued, Error)
                | (Processing, Completed)
                | (Processing, Cancelled)
                | (Processing, Error)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Processing => write!(f, "processing"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Cancelled => write!(f, "cancelled"),
            JobStatus::Error => write!(f, "error"),
        }
    }
}

/// Terminal result of one work item.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ItemOutcome {
    Pending,
    Succeeded,
    Failed,
    Cancelled,
}

// ─── Items ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    /// 1-based position in the playlist.
    pub index: usize,
    pub source_locator: String,
    pub display_name: String,
}

impl WorkItem {
    pub fn new(
        index: usize,
        source_locator: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            index,
            source_locator: source_locator.into(),
            display_name: display_name.into(),
        }
    }
}

/// What the item processor reports back for one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemReport {
    pub index: usize,
    /// Best known name: the archive entry name on success, otherwise the
    /// display name (possibly improved by transcoder metadata).
    pub name: String,
    pub outcome: ItemOutcome,
    /// Failure reason, if any.
    pub detail: Option<String>,
}

impl ItemReport {
    pub fn succeeded(item: &WorkItem, entry_name: impl Into<String>) -> Self {
        Self {
            index: item.index,
            name: entry_name.into(),
            outcome: ItemOutcome::Succeeded,
            detail: None,
        }
    }

    pub fn failed(item: &WorkItem, name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            index: item.index,
            name: name.into(),
            outcome: ItemOutcome::Failed,
            detail: Some(reason.into()),
        }
    }

    pub fn cancelled(item: &WorkItem) -> Self {
        Self {
            index: item.index,
            name: item.display_name.clone(),
            outcome: ItemOutcome::Cancelled,
            detail: None,
        }
    }
}

// ─── Snapshot ───────────────────────────────────────────────────────────────

/// Pull-model view of a job. Contains nothing that changes without activity
/// on the job itself, so repeated polls compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub job_id: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub total: usize,
    pub completed: usize,
    pub skipped: usize,
    pub cancelled: usize,
    pub current_item: Option<String>,
    pub zip_ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive_path: Option<String>,
    pub archive_name: String,
    pub skipped_items: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_position: Option<usize>,
    /// Seconds until the job is expected to start.
    #[serde(rename = "estimatedWait", skip_serializing_if = "Option::is_none")]
    pub estimated_wait_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

/// Counter values at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct JobCounts {
    pub total: usize,
    pub completed: usize,
    pub skipped: usize,
    pub cancelled: usize,
}

// ─── Job ────────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct JobState {
    status: JobStatus,
    outcomes: Vec<ItemOutcome>,
    names: Vec<String>,
    completed: usize,
    skipped: usize,
    cancelled: usize,
    in_flight: BTreeSet<usize>,
    skipped_items: Vec<String>,
    archive_path: Option<PathBuf>,
    error: Option<String>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    last_activity: DateTime<Utc>,
}

/// A batch of items converted into one archive.
///
/// Immutable parts (id, items, total) are plain fields behind accessors; all
/// mutable state lives behind one mutex. Status changes are also published on
/// a watch channel so callers can await a terminal status.
#[derive(Debug)]
pub struct Job {
    id: String,
    source_locator: String,
    title: Option<String>,
    archive_name: String,
    items: Vec<WorkItem>,
    created_at: DateTime<Utc>,
    cancel: CancellationToken,
    state: Mutex<JobState>,
    status_tx: watch::Sender<JobStatus>,
    watchers: AtomicUsize,
}

impl Job {
    pub fn new(
        source_locator: impl Into<String>,
        title: Option<String>,
        items: Vec<WorkItem>,
    ) -> Self {
        Self::with_id(
            uuid::Uuid::new_v4().to_string(),
            source_locator,
            title,
            items,
        )
    }

    pub fn with_id(
        id: impl Into<String>,
        source_locator: impl Into<String>,
        title: Option<String>,
        items: Vec<WorkItem>,
    ) -> Self {
        let id = id.into();
        let now = Utc::now();
        let archive_name = archive_file_name(title.as_deref(), &id);
        let (status_tx, _) = watch::channel(JobStatus::Queued);

        let state = JobState {
            status: JobStatus::Queued,
            outcomes: vec![ItemOutcome::Pending; items.len()],
            names: items.iter().map(|i| i.display_name.clone()).collect(),
            completed: 0,
            skipped: 0,
            cancelled: 0,
            in_flight: BTreeSet::new(),
            skipped_items: Vec::new(),
            archive_path: None,
            error: None,
            started_at: None,
            finished_at: None,
            last_activity: now,
        };

        Self {
            id,
            source_locator: source_locator.into(),
            title,
            archive_name,
            items,
            created_at: now,
            cancel: CancellationToken::new(),
            state: Mutex::new(state),
            status_tx,
            watchers: AtomicUsize::new(0),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, JobState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Job {} state lock was poisoned, recovering", self.id);
                poisoned.into_inner()
            }
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn source_locator(&self) -> &str {
        &self.source_locator
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn archive_name(&self) -> &str {
        &self.archive_name
    }

    pub fn items(&self) -> &[WorkItem] {
        &self.items
    }

    pub fn total(&self) -> usize {
        self.items.len()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    // ─── Cancellation ───────────────────────────────────────────────────────

    /// Set the one-way cancellation flag.
    pub fn request_cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    // ─── Status ─────────────────────────────────────────────────────────────

    pub fn status(&self) -> JobStatus {
        self.lock_state().status
    }

    /// Move to `next` if allowed. Returns false (and logs) otherwise.
    pub fn transition(&self, next: JobStatus) -> bool {
        let mut state = self.lock_state();
        self.transition_locked(&mut state, next)
    }

    fn transition_locked(&self, state: &mut JobState, next: JobStatus) -> bool {
        if !state.status.can_transition_to(next) {
            log::warn!(
                "Job {}: rejected status change {} -> {}",
                self.id,
                state.status,
                next
            );
            return false;
        }

        let now = Utc::now();
        state.status = next;
        if next == JobStatus::Processing {
            state.started_at = Some(now);
        }
        if next.is_terminal() {
            state.finished_at = Some(now);
            state.in_flight.clear();
        }
        state.last_activity = now;
        self.status_tx.send_replace(next);
        true
    }

    /// Enter `processing`.
    pub fn activate(&self) -> bool {
        self.transition(JobStatus::Processing)
    }

    /// Record where the job's archive lives once it has been created.
    pub fn attach_archive(&self, archive_path: &Path) {
        self.lock_state().archive_path = Some(archive_path.to_path_buf());
    }

    /// Enter `error` with a message.
    pub fn fail(&self, message: impl Into<String>) -> bool {
        let mut state = self.lock_state();
        if !self.transition_locked(&mut state, JobStatus::Error) {
            return false;
        }
        state.error = Some(message.into());
        true
    }

    /// Resolve the terminal status after processing: `cancelled` if the flag
    /// was set, `completed` otherwise.
    pub fn finish(&self) -> JobStatus {
        let next = if self.is_cancel_requested() {
            JobStatus::Cancelled
        } else {
            JobStatus::Completed
        };
        let mut state = self.lock_state();
        self.transition_locked(&mut state, next);
        state.status
    }

    pub fn subscribe_status(&self) -> watch::Receiver<JobStatus> {
        self.status_tx.subscribe()
    }

    /// Wait until the job reaches a terminal status.
    pub async fn wait_until_terminal(&self) -> JobStatus {
        let mut rx = self.subscribe_status();
        let result = rx.wait_for(|status| status.is_terminal()).await.map(|s| *s);
        match result {
            Ok(status) => status,
            // Sender lives as long as the job, so this only happens on teardown
            Err(_) => self.status(),
        }
    }

    // ─── Items ──────────────────────────────────────────────────────────────

    pub fn item_started(&self, index: usize) {
        let mut state = self.lock_state();
        state.in_flight.insert(index);
        state.last_activity = Utc::now();
    }

    /// Record an item's terminal outcome. The first write wins; later writes
    /// are ignored and logged.
    pub fn record_outcome(&self, report: &ItemReport) -> bool {
        let mut state = self.lock_state();
        let slot = match report.index.checked_sub(1) {
            Some(slot) if slot < state.outcomes.len() => slot,
            _ => {
                log::warn!("Job {}: outcome for unknown item {}", self.id, report.index);
                return false;
            }
        };

        if state.outcomes[slot] != ItemOutcome::Pending {
            log::warn!(
                "Job {}: item {} already {:?}, ignoring {:?}",
                self.id,
                report.index,
                state.outcomes[slot],
                report.outcome
            );
            return false;
        }

        state.outcomes[slot] = report.outcome;
        state.names[slot] = report.name.clone();
        state.in_flight.remove(&report.index);
        state.last_activity = Utc::now();

        match report.outcome {
            ItemOutcome::Succeeded => state.completed += 1,
            ItemOutcome::Failed => {
                state.skipped += 1;
                state.skipped_items.push(report.name.clone());
            }
            ItemOutcome::Cancelled => state.cancelled += 1,
            ItemOutcome::Pending => {}
        }
        true
    }

    pub fn outcome(&self, index: usize) -> Option<ItemOutcome> {
        let state = self.lock_state();
        index
            .checked_sub(1)
            .and_then(|slot| state.outcomes.get(slot).copied())
    }

    pub fn counts(&self) -> JobCounts {
        let state = self.lock_state();
        JobCounts {
            total: self.items.len(),
            completed: state.completed,
            skipped: state.skipped,
            cancelled: state.cancelled,
        }
    }

    // ─── Activity ───────────────────────────────────────────────────────────

    pub fn touch(&self) {
        self.lock_state().last_activity = Utc::now();
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        self.lock_state().last_activity
    }

    /// Register a live progress subscriber. The job counts as watched until
    /// the returned guard is dropped.
    pub fn watch(self: &Arc<Self>) -> JobWatch {
        self.watchers.fetch_add(1, Ordering::SeqCst);
        self.touch();
        JobWatch {
            job: Arc::clone(self),
        }
    }

    pub fn watcher_count(&self) -> usize {
        self.watchers.load(Ordering::SeqCst)
    }

    pub fn error(&self) -> Option<String> {
        self.lock_state().error.clone()
    }

    pub fn archive_path(&self) -> Option<PathBuf> {
        self.lock_state().archive_path.clone()
    }

    /// Archive location once it is worth downloading: the job completed, or
    /// was cancelled after at least one item made it in.
    pub fn ready_archive(&self) -> Option<PathBuf> {
        let state = self.lock_state();
        if Self::zip_ready(&state) {
            state.archive_path.clone()
        } else {
            None
        }
    }

    fn zip_ready(state: &JobState) -> bool {
        state.archive_path.is_some()
            && match state.status {
                JobStatus::Completed => true,
                JobStatus::Cancelled => state.completed > 0,
                _ => false,
            }
    }

    pub fn snapshot(
        &self,
        queue_position: Option<usize>,
        estimated_wait_secs: Option<u64>,
    ) -> JobSnapshot {
        let state = self.lock_state();
        let current_item = state
            .in_flight
            .iter()
            .next_back()
            .and_then(|index| index.checked_sub(1))
            .and_then(|slot| state.names.get(slot))
            .cloned();

        JobSnapshot {
            job_id: self.id.clone(),
            status: state.status,
            title: self.title.clone(),
            total: self.items.len(),
            completed: state.completed,
            skipped: state.skipped,
            cancelled: state.cancelled,
            current_item,
            zip_ready: Self::zip_ready(&state),
            archive_path: state
                .archive_path
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
            archive_name: self.archive_name.clone(),
            skipped_items: state.skipped_items.clone(),
            queue_position,
            estimated_wait_secs,
            error: state.error.clone(),
            created_at: self.created_at,
            started_at: state.started_at,
            finished_at: state.finished_at,
        }
    }
}

/// Keeps a [`Job`] marked as watched while alive.
#[derive(Debug)]
pub struct JobWatch {
    job: Arc<Job>,
}

impl JobWatch {
    pub fn job(&self) -> &Arc<Job> {
        &self.job
    }
}

impl Drop for JobWatch {
    fn drop(&mut self) {
        self.job.watchers.fetch_sub(1, Ordering::SeqCst);
        self.job.touch();
    }
}
