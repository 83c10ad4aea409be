use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use super::{TranscodeRequest, TranscodedTrack, Transcoder};
use crate::config::{RetryPolicy, TranscoderConfig};
use crate::error::TranscodeError;
use crate::process::{self, RunError};

/// Transcoder that shells out to an external downloader/converter
/// (`yt-dlp -x` by default).
#[derive(Debug, Clone)]
pub struct CommandTranscoder {
    config: TranscoderConfig,
    retry: RetryPolicy,
}

#[derive(Debug, Default, Deserialize)]
struct PrintedMetadata {
    title: Option<String>,
    artist: Option<String>,
}

fn clean_field(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty() && v != "NA")
}

/// Pick the metadata object printed last on stdout, if any.
fn parse_metadata(stdout: &str) -> PrintedMetadata {
    stdout
        .lines()
        .rev()
        .map(str::trim)
        .filter(|line| line.starts_with('{'))
        .find_map(|line| serde_json::from_str::<PrintedMetadata>(line).ok())
        .map(|meta| PrintedMetadata {
            title: clean_field(meta.title),
            artist: clean_field(meta.artist),
        })
        .unwrap_or_default()
}

async fn find_output(dir: &Path, extension: &str) -> Result<PathBuf, TranscodeError> {
    let io_err = |source| TranscodeError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut entries = tokio::fs::read_dir(dir).await.map_err(io_err)?;
    let mut candidates = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
        let path = entry.path();
        let matches = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(extension));
        if matches && entry.file_type().await.map_err(io_err)?.is_file() {
            candidates.push(path);
        }
    }

    candidates.sort();
    candidates
        .into_iter()
        .next()
        .ok_or_else(|| TranscodeError::NoOutput(dir.to_path_buf()))
}

/// Empty `dir` so a retry does not pick up partial files.
async fn reset_dir(dir: &Path) -> Result<(), TranscodeError> {
    let io_err = |source| TranscodeError::Io {
        path: dir.to_path_buf(),
        source,
    };
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(io_err(e)),
    }
    tokio::fs::create_dir_all(dir).await.map_err(io_err)
}

impl CommandTranscoder {
    pub fn new(config: TranscoderConfig, retry: RetryPolicy) -> Self {
        Self { config, retry }
    }

    fn args_for(&self, request: &TranscodeRequest) -> Vec<String> {
        let output_dir = request.output_dir.to_string_lossy();
        let socket_timeout = self.retry.socket_timeout_secs.to_string();
        process::expand_args(
            &self.config.args,
            &[
                ("locator", request.locator.as_str()),
                ("output_dir", output_dir.as_ref()),
                ("format", self.config.format.as_str()),
                ("bitrate", self.config.bitrate.as_str()),
                ("socket_timeout", socket_timeout.as_str()),
            ],
        )
    }

    async fn attempt(
        &self,
        request: &TranscodeRequest,
        cancel: &CancellationToken,
    ) -> Result<TranscodedTrack, TranscodeError> {
        reset_dir(&request.output_dir).await?;

        let mut cmd = process::command(&self.config.program);
        cmd.args(self.args_for(request))
            .current_dir(&request.output_dir);

        let output = process::run(&mut cmd, Some(cancel))
            .await
            .map_err(|e| match e {
                RunError::Spawn(source) | RunError::Io(source) => TranscodeError::Spawn {
                    program: self.config.program.clone(),
                    source,
                },
                RunError::Cancelled => TranscodeError::Cancelled,
            })?;

        if !output.success() {
            return Err(TranscodeError::Failed {
                code: output.status.code(),
                stderr: output.stderr_tail(),
            });
        }

        let path = find_output(&request.output_dir, &self.config.format).await?;
        let metadata = parse_metadata(&output.stdout);

        Ok(TranscodedTrack {
            path,
            title: metadata.title,
            artist: metadata.artist,
        })
    }
}

#[async_trait]
impl Transcoder for CommandTranscoder {
    async fn transcode(
        &self,
        request: &TranscodeRequest,
        cancel: &CancellationToken,
    ) -> Result<TranscodedTrack, TranscodeError> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            if cancel.is_cancelled() {
                return Err(TranscodeError::Cancelled);
            }

            match self.attempt(request, cancel).await {
                Ok(track) => return Ok(track),
                Err(e @ (TranscodeError::Failed { .. } | TranscodeError::NoOutput(_)))
                    if attempt < max_attempts =>
                {
                    log::warn!(
                        "Item {} attempt {}/{} failed: {}",
                        request.index,
                        attempt,
                        max_attempts,
                        e
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(TranscodeError::Cancelled),
                        _ = tokio::time::sleep(self.retry.backoff_after(attempt)) => {}
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn extension(&self) -> &str {
        &self.config.format
    }
}
