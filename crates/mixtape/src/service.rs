//! The `Mixtape` service facade.
//!
//! Wires the resolver, transcoder, worker pool, queue and broadcaster together
//! from a [`Config`] and exposes the operations callers need: submit, status,
//! cancel, download and subscribe.

use std::path::PathBuf;
use std::sync::Arc;

use futures_util::stream::BoxStream;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::broadcast::{JobProgressBroadcaster, JobProgressEvent};
use crate::config::{validate_config, Config};
use crate::error::{QueueError, ResolveError, Result};
use crate::queue::{JobRegistry, QueueManager, Reaper};
use crate::source::{build_items, CommandResolver, SourceResolver};
use crate::storage::WorkLayout;
use crate::transcode::{CommandTranscoder, Transcoder};
use crate::worker::{ItemProcessor, Job, JobSnapshot, JobStatus, WorkerPool};

/// Returned by [`Mixtape::submit`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitReceipt {
    pub job_id: String,
    pub title: Option<String>,
    pub total: usize,
    pub status: JobStatus,
    pub queue_position: usize,
}

/// Returned by [`Mixtape::cancel`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelReceipt {
    pub job_id: String,
    pub status: JobStatus,
}

pub struct Mixtape {
    config: Config,
    resolver: Arc<dyn SourceResolver>,
    queue: QueueManager,
}

impl Mixtape {
    /// Build a service that shells out to the configured resolver and
    /// transcoder programs.
    pub fn from_config(config: Config) -> Result<Self> {
        let resolver = CommandResolver::new(config.resolver.clone(), config.retry.clone());
        let transcoder = CommandTranscoder::new(config.transcoder.clone(), config.retry.clone());
        Self::with_collaborators(config, Arc::new(resolver), Arc::new(transcoder))
    }

    /// Build a service around caller-provided collaborators.
    pub fn with_collaborators(
        config: Config,
        resolver: Arc<dyn SourceResolver>,
        transcoder: Arc<dyn Transcoder>,
    ) -> Result<Self> {
        validate_config(&config)?;

        let layout = WorkLayout::new(config.work_directory());
        let processor = ItemProcessor::new(transcoder, layout.clone());
        let pool = WorkerPool::new(Arc::new(processor), config.worker_count);
        let queue = QueueManager::new(
            Arc::new(JobRegistry::new()),
            pool,
            JobProgressBroadcaster::new(config.event_capacity),
            layout,
            config.estimated_item_secs,
        );

        log::info!(
            "Mixtape service ready: {} worker(s), work directory {}",
            config.worker_count,
            config.work_directory().display()
        );

        Ok(Self {
            config,
            resolver,
            queue,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn queue(&self) -> &QueueManager {
        &self.queue
    }

    pub fn job(&self, id: &str) -> Option<Arc<Job>> {
        self.queue.registry().get(id)
    }

    // ─── Operations ─────────────────────────────────────────────────────────

    /// Resolve `locator` into items and hand the resulting job to the queue.
    ///
    /// A malformed locator is rejected outright. When the resolver cannot
    /// enumerate the playlist, the job is registered in `error` with the
    /// resolver's message so `status` reports it.
    pub async fn submit(&self, locator: &str) -> Result<SubmitReceipt> {
        let locator = locator.trim();
        let resolved = self.resolver.resolve(locator).await.and_then(|playlist| {
            let items = build_items(&playlist, self.config.max_items);
            if items.is_empty() {
                Err(ResolveError::Empty)
            } else {
                Ok((playlist.title, items))
            }
        });

        let (job, queue_position) = match resolved {
            Ok((title, items)) => self.queue.submit(Job::new(locator, title, items)),
            Err(e @ ResolveError::UnsupportedLocator(_)) => return Err(e.into()),
            Err(e) => {
                let job = self
                    .queue
                    .reject(Job::new(locator, None, Vec::new()), e.to_string());
                (job, 0)
            }
        };

        // Status as of admission; a fast job may already have moved on.
        let status = match job.status() {
            JobStatus::Error => JobStatus::Error,
            _ if queue_position == 0 => JobStatus::Processing,
            _ => JobStatus::Queued,
        };
        Ok(SubmitReceipt {
            job_id: job.id().to_string(),
            title: job.title().map(str::to_string),
            total: job.total(),
            status,
            queue_position,
        })
    }

    pub fn status(&self, id: &str) -> std::result::Result<JobSnapshot, QueueError> {
        self.queue.status(id)
    }

    pub fn cancel(&self, id: &str) -> std::result::Result<CancelReceipt, QueueError> {
        let status = self.queue.cancel(id)?;
        Ok(CancelReceipt {
            job_id: id.to_string(),
            status,
        })
    }

    /// Path of the finished archive for `id`, provided `filename` is the
    /// job's archive name and the archive is ready.
    pub fn archive_for_download(
        &self,
        id: &str,
        filename: &str,
    ) -> std::result::Result<PathBuf, QueueError> {
        let job = self
            .job(id)
            .ok_or_else(|| QueueError::JobNotFound(id.to_string()))?;
        job.touch();

        if filename != job.archive_name() {
            return Err(QueueError::ArchiveNotAvailable(id.to_string()));
        }
        match job.ready_archive() {
            Some(path) if path.is_file() => Ok(path),
            _ => Err(QueueError::ArchiveNotAvailable(id.to_string())),
        }
    }

    /// Current snapshot plus the live event stream for `id`.
    ///
    /// The stream is subscribed before the snapshot is taken, so every change
    /// after the snapshot shows up in the stream.
    pub fn subscribe(
        &self,
        id: &str,
    ) -> std::result::Result<(JobSnapshot, BoxStream<'static, JobProgressEvent>), QueueError> {
        let job = self
            .job(id)
            .ok_or_else(|| QueueError::JobNotFound(id.to_string()))?;

        let events = self
            .queue
            .broadcaster()
            .job_events(job, self.config.heartbeat());
        let snapshot = self.queue.status(id)?;
        Ok((snapshot, events))
    }

    /// Start the idle-job reaper. It runs until `shutdown` is cancelled.
    pub fn spawn_reaper(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        Reaper::new(
            self.queue.clone(),
            self.config.retention(),
            self.config.reaper_interval(),
        )
        .start(shutdown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{MixtapeError, TranscodeError};
    use crate::source::{ResolvedItem, ResolvedPlaylist, StaticResolver};
    use crate::transcode::{TranscodeRequest, TranscodedTrack};
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct InstantTranscoder;

    #[async_trait]
    impl Transcoder for InstantTranscoder {
        async fn transcode(
            &self,
            request: &TranscodeRequest,
            _cancel: &CancellationToken,
        ) -> std::result::Result<TranscodedTrack, TranscodeError> {
            let path = request.output_dir.join("track.mp3");
            tokio::fs::write(&path, b"ID3 payload").await.unwrap();
            Ok(TranscodedTrack::new(path))
        }
    }

    fn service(dir: &TempDir, items: usize) -> Mixtape {
        let config = Config {
            work_directory: dir.path().to_string_lossy().into_owned(),
            max_items: 3,
            ..Config::default()
        };
        let playlist = ResolvedPlaylist {
            title: Some("Road Trip".to_string()),
            items: (1..=items)
                .map(|i| {
                    ResolvedItem::new(format!("https://x/{}", i)).with_title(format!("T{}", i))
                })
                .collect(),
        };
        Mixtape::with_collaborators(
            config,
            Arc::new(StaticResolver::new(playlist)),
            Arc::new(InstantTranscoder),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_submit_truncates_and_completes() {
        let dir = TempDir::new().unwrap();
        let mixtape = service(&dir, 5);

        let receipt = mixtape.submit(" https://x/list ").await.unwrap();
        assert_eq!(receipt.total, 3);
        assert_eq!(receipt.queue_position, 0);
        assert_eq!(receipt.status, JobStatus::Processing);
        assert_eq!(receipt.title.as_deref(), Some("Road Trip"));

        let job = mixtape.job(&receipt.job_id).unwrap();
        assert_eq!(job.wait_until_terminal().await, JobStatus::Completed);
        assert_eq!(job.source_locator(), "https://x/list");

        let path = mixtape
            .archive_for_download(&receipt.job_id, "Road Trip.zip")
            .unwrap();
        assert!(path.is_file());
    }

    #[tokio::test]
    async fn test_submit_rejects_bad_locator() {
        let dir = TempDir::new().unwrap();
        let mixtape = service(&dir, 2);
        let err = mixtape.submit("not a url").await.unwrap_err();
        assert!(matches!(
            err,
            MixtapeError::Resolve(ResolveError::UnsupportedLocator(_))
        ));
        assert!(mixtape.queue().registry().is_empty());
    }

    #[tokio::test]
    async fn test_download_requires_matching_name() {
        let dir = TempDir::new().unwrap();
        let mixtape = service(&dir, 1);
        let receipt = mixtape.submit("https://x/list").await.unwrap();
        mixtape
            .job(&receipt.job_id)
            .unwrap()
            .wait_until_terminal()
            .await;

        assert!(matches!(
            mixtape.archive_for_download(&receipt.job_id, "other.zip"),
            Err(QueueError::ArchiveNotAvailable(_))
        ));
        assert!(matches!(
            mixtape.archive_for_download("missing", "Road Trip.zip"),
            Err(QueueError::JobNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_cancel_unknown_job() {
        let dir = TempDir::new().unwrap();
        let mixtape = service(&dir, 1);
        assert!(matches!(
            mixtape.cancel("nope"),
            Err(QueueError::JobNotFound(_))
        ));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = Config {
            worker_count: 0,
            ..Config::default()
        };
        let result = Mixtape::with_collaborators(
            config,
            Arc::new(StaticResolver::new(ResolvedPlaylist {
                title: None,
                items: Vec::new(),
            })),
            Arc::new(InstantTranscoder),
        );
        assert!(matches!(result, Err(MixtapeError::Config(_))));
    }
}
