use async_trait::async_trait;
use serde::Deserialize;

use super::{validate_locator, ResolvedItem, ResolvedPlaylist, SourceResolver};
use crate::config::{ResolverConfig, RetryPolicy};
use crate::error::ResolveError;
use crate::process::{self, RunError};

/// Resolver backed by an external program that prints the playlist as one
/// JSON document (`yt-dlp --flat-playlist --dump-single-json` by default).
#[derive(Debug, Clone)]
pub struct CommandResolver {
    config: ResolverConfig,
    retry: RetryPolicy,
}

#[derive(Debug, Deserialize)]
struct RawPlaylist {
    title: Option<String>,
    entries: Option<Vec<Option<RawEntry>>>,
    #[serde(flatten)]
    single: RawEntry,
}

#[derive(Debug, Default, Deserialize)]
struct RawEntry {
    url: Option<String>,
    webpage_url: Option<String>,
    id: Option<String>,
    title: Option<String>,
    uploader: Option<String>,
}

impl RawEntry {
    fn into_item(self) -> Option<ResolvedItem> {
        let locator = self.webpage_url.or(self.url).or(self.id)?;
        Some(ResolvedItem {
            locator,
            title: self.title,
            uploader: self.uploader,
        })
    }
}

/// Parse the resolver's JSON output.
///
/// A document without `entries` is a single item. Entries without any usable
/// locator (deleted or private tracks show up as `null`) are dropped.
pub fn parse_playlist(json: &str) -> Result<ResolvedPlaylist, ResolveError> {
    let raw: RawPlaylist = serde_json::from_str(json)?;

    let items: Vec<ResolvedItem> = match raw.entries {
        Some(entries) => entries
            .into_iter()
            .flatten()
            .filter_map(RawEntry::into_item)
            .collect(),
        None => RawEntry {
            title: raw.title.clone(),
            ..raw.single
        }
        .into_item()
        .into_iter()
        .collect(),
    };

    if items.is_empty() {
        return Err(ResolveError::Empty);
    }

    Ok(ResolvedPlaylist {
        title: raw.title,
        items,
    })
}

impl CommandResolver {
    pub fn new(config: ResolverConfig, retry: RetryPolicy) -> Self {
        Self { config, retry }
    }

    async fn attempt(&self, locator: &str) -> Result<ResolvedPlaylist, ResolveError> {
        let socket_timeout = self.retry.socket_timeout_secs.to_string();
        let args = process::expand_args(
            &self.config.args,
            &[("locator", locator), ("socket_timeout", &socket_timeout)],
        );

        let mut cmd = process::command(&self.config.program);
        cmd.args(&args);

        let output = process::run(&mut cmd, None).await.map_err(|e| match e {
            RunError::Spawn(source) | RunError::Io(source) => ResolveError::Spawn {
                program: self.config.program.clone(),
                source,
            },
            RunError::Cancelled => ResolveError::Failed {
                code: None,
                stderr: "cancelled".to_string(),
            },
        })?;

        if !output.success() {
            return Err(ResolveError::Failed {
                code: output.status.code(),
                stderr: output.stderr_tail(),
            });
        }

        parse_playlist(&output.stdout)
    }
}

#[async_trait]
impl SourceResolver for CommandResolver {
    async fn resolve(&self, locator: &str) -> Result<ResolvedPlaylist, ResolveError> {
        validate_locator(locator)?;
        let locator = locator.trim();

        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.attempt(locator).await {
                Ok(playlist) => {
                    log::info!(
                        "Resolved playlist {:?} with {} items",
                        playlist.title,
                        playlist.items.len()
                    );
                    return Ok(playlist);
                }
                // Only a failed run is worth repeating
                Err(ResolveError::Failed { code, stderr }) if attempt < max_attempts => {
                    log::warn!(
                        "Resolver attempt {}/{} failed ({:?}): {}",
                        attempt,
                        max_attempts,
                        code,
                        stderr
                    );
                    tokio::time::sleep(self.retry.backoff_after(attempt)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
