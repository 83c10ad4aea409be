//! Periodic reclamation of idle jobs.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::queue::manager::QueueManager;
use crate::worker::JobStatus;

/// Removes jobs nobody has touched for longer than the retention window,
/// together with their working directory and archive. The active job and
/// jobs with a live progress subscriber are never reaped.
pub struct Reaper {
    manager: QueueManager,
    retention: Duration,
    interval: Duration,
}

impl Reaper {
    pub fn new(manager: QueueManager, retention: Duration, interval: Duration) -> Self {
        Self {
            manager,
            retention,
            interval,
        }
    }

    /// Start the reaper loop. It stops when `shutdown` is cancelled.
    pub fn start(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval_timer = tokio::time::interval(self.interval);
            interval_timer.tick().await; // skip immediate first tick

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval_timer.tick() => {}
                }

                let reaped = self.reap_once(Utc::now()).await;
                if reaped > 0 {
                    log::info!("Reaper removed {} idle jobs", reaped);
                }
            }
            log::debug!("Reaper stopped");
        })
    }

    /// Reap every eligible job as of `now`. Returns how many were removed.
    pub async fn reap_once(&self, now: DateTime<Utc>) -> usize {
        let retention = match chrono::Duration::from_std(self.retention) {
            Ok(retention) => retention,
            Err(_) => return 0,
        };

        let mut reaped = 0;
        for job in self.manager.registry().jobs() {
            if self.manager.is_active(job.id()) || job.watcher_count() > 0 {
                continue;
            }
            if now.signed_duration_since(job.last_activity()) <= retention {
                continue;
            }

            if job.status() == JobStatus::Queued {
                if let Err(e) = self.manager.cancel(job.id()) {
                    log::warn!("Reaper could not cancel job {}: {}", job.id(), e);
                }
                // Activated in the meantime
                if self.manager.is_active(job.id()) {
                    continue;
                }
            }

            self.manager.registry().remove(job.id());
            if let Err(e) = self.manager.layout().remove_job_dir(job.id()).await {
                log::warn!("Failed to remove working directory of job {}: {}", job.id(), e);
            }
            log::info!("Reaped idle job {} ({})", job.id(), job.status());
            reaped += 1;
        }
        reaped
    }
}
