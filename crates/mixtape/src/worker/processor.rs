use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, info_span, warn, Instrument};

use crate::error::TranscodeError;
use crate::sanitize::{entry_name, redact_locator, redact_path};
use crate::storage::{remove_dir_if_exists, ArchiveBuilder, WorkLayout};
use crate::transcode::{validate_output, TranscodeRequest, Transcoder};
use crate::worker::job::{ItemReport, Job, WorkItem};

/// Runs one work item end to end: transcode, validate, append, clean up.
pub struct ItemProcessor {
    transcoder: Arc<dyn Transcoder>,
    layout: WorkLayout,
}

impl ItemProcessor {
    pub fn new(transcoder: Arc<dyn Transcoder>, layout: WorkLayout) -> Self {
        Self { transcoder, layout }
    }

    pub fn layout(&self) -> &WorkLayout {
        &self.layout
    }

    /// Process `item` and report its outcome. Never fails: every error is
    /// folded into the report.
    pub async fn process(
        &self,
        item: &WorkItem,
        job: &Job,
        archive: &ArchiveBuilder,
    ) -> ItemReport {
        let span = info_span!(
            "item",
            job_id = %job.id(),
            index = item.index,
            source = %redact_locator(&item.source_locator),
        );
        self.process_inner(item, job, archive).instrument(span).await
    }

    async fn process_inner(
        &self,
        item: &WorkItem,
        job: &Job,
        archive: &ArchiveBuilder,
    ) -> ItemReport {
        if job.is_cancel_requested() {
            debug!("Skipping item, job cancelled");
            return ItemReport::cancelled(item);
        }

        let dir = self.layout.item_dir(job.id(), item.index);
        let report = self.convert_and_append(item, job, archive, &dir).await;

        if let Err(e) = remove_dir_if_exists(&dir).await {
            warn!(dir = %redact_path(&dir), error = %e, "Failed to remove item directory");
        }

        match &report.detail {
            Some(reason) => warn!(name = %report.name, %reason, "Item failed"),
            None => info!(name = %report.name, outcome = ?report.outcome, "Item finished"),
        }
        report
    }

    async fn convert_and_append(
        &self,
        item: &WorkItem,
        job: &Job,
        archive: &ArchiveBuilder,
        dir: &Path,
    ) -> ItemReport {
        if let Err(e) = tokio::fs::create_dir_all(dir).await {
            return ItemReport::failed(item, &item.display_name, e.to_string());
        }

        let request = TranscodeRequest {
            index: item.index,
            locator: item.source_locator.clone(),
            output_dir: dir.to_path_buf(),
        };

        let track = match self.transcoder.transcode(&request, job.cancel_token()).await {
            Ok(track) => track,
            Err(TranscodeError::Cancelled) if job.is_cancel_requested() => {
                return ItemReport::cancelled(item)
            }
            Err(TranscodeError::Cancelled) => {
                return ItemReport::failed(
                    item,
                    &item.display_name,
                    "transcoder cancelled without a cancellation request",
                )
            }
            Err(e) => return ItemReport::failed(item, &item.display_name, e.to_string()),
        };

        let stem = track.entry_stem(&item.display_name);
        if let Err(e) = validate_output(&track.path).await {
            return ItemReport::failed(item, stem, e.to_string());
        }

        let extension = track
            .path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_else(|| self.transcoder.extension());
        let name = entry_name(&stem, item.index, extension);

        if job.is_cancel_requested() {
            return ItemReport::cancelled(item);
        }

        match archive.append(&track.path, &name).await {
            Ok(stored) => ItemReport::succeeded(item, stored),
            Err(e) => ItemReport::failed(item, stem, e.to_string()),
        }
    }
}
