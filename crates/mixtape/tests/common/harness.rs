//! Test harness for isolated pipeline runs.
//!
//! `TestHarness` owns a temporary work directory, a resolver that serves
//! playlists registered by the test, and a `FakeTranscoder` whose behaviour
//! can be scripted per item locator.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use mixtape::source::validate_locator;
use mixtape::{
    Config, Mixtape, ResolveError, ResolvedItem, ResolvedPlaylist, SourceResolver,
    TranscodeError, TranscodeRequest, TranscodedTrack, Transcoder,
};

use super::ConfigBuilder;

// ─── Resolver ───────────────────────────────────────────────────────────────

/// Resolver backed by an in-memory map of playlist locator to playlist.
#[derive(Default)]
pub struct PlaylistResolver {
    playlists: Mutex<HashMap<String, ResolvedPlaylist>>,
}

impl PlaylistResolver {
    pub fn insert(&self, locator: &str, playlist: ResolvedPlaylist) {
        self.playlists
            .lock()
            .unwrap()
            .insert(locator.to_string(), playlist);
    }
}

#[async_trait]
impl SourceResolver for PlaylistResolver {
    async fn resolve(&self, locator: &str) -> Result<ResolvedPlaylist, ResolveError> {
        validate_locator(locator)?;
        self.playlists
            .lock()
            .unwrap()
            .get(locator)
            .cloned()
            .ok_or(ResolveError::Empty)
    }
}

// ─── Transcoder ─────────────────────────────────────────────────────────────

/// Transcoder that writes a tiny fake MP3 after a short delay.
///
/// Locators in `failing` produce an error; locators in `holding` block until
/// the job is cancelled. Tracks invocations and peak concurrency.
pub struct FakeTranscoder {
    delay: Duration,
    failing: Mutex<HashSet<String>>,
    holding: Mutex<HashSet<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    invocations: Mutex<Vec<String>>,
}

impl FakeTranscoder {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            failing: Mutex::new(HashSet::new()),
            holding: Mutex::new(HashSet::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            invocations: Mutex::new(Vec::new()),
        }
    }

    pub fn fail(&self, locator: &str) {
        self.failing.lock().unwrap().insert(locator.to_string());
    }

    pub fn hold(&self, locator: &str) {
        self.holding.lock().unwrap().insert(locator.to_string());
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn invocations(&self) -> Vec<String> {
        self.invocations.lock().unwrap().clone()
    }

    pub fn invocation_count(&self) -> usize {
        self.invocations.lock().unwrap().len()
    }

    async fn work(
        &self,
        request: &TranscodeRequest,
        cancel: &CancellationToken,
    ) -> Result<TranscodedTrack, TranscodeError> {
        let held = self.holding.lock().unwrap().contains(&request.locator);
        if held {
            cancel.cancelled().await;
            return Err(TranscodeError::Cancelled);
        }

        tokio::select! {
            _ = cancel.cancelled() => return Err(TranscodeError::Cancelled),
            _ = tokio::time::sleep(self.delay) => {}
        }

        if self.failing.lock().unwrap().contains(&request.locator) {
            return Err(TranscodeError::Failed {
                code: Some(1),
                stderr: "ERROR: Video unavailable".to_string(),
            });
        }

        let path = request.output_dir.join("track.mp3");
        let mut content = b"ID3".to_vec();
        content.extend_from_slice(request.locator.as_bytes());
        tokio::fs::write(&path, content).await.unwrap();
        Ok(TranscodedTrack::new(path))
    }
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    async fn transcode(
        &self,
        request: &TranscodeRequest,
        cancel: &CancellationToken,
    ) -> Result<TranscodedTrack, TranscodeError> {
        self.invocations
            .lock()
            .unwrap()
            .push(request.locator.clone());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let result = self.work(request, cancel).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

// ─── Harness ────────────────────────────────────────────────────────────────

/// Isolated environment for integration tests.
pub struct TestHarness {
    temp_dir: TempDir,
    pub resolver: Arc<PlaylistResolver>,
    pub transcoder: Arc<FakeTranscoder>,
}

impl TestHarness {
    /// Create a harness whose transcoder takes 20ms per item.
    pub fn new() -> Self {
        Self::with_delay(Duration::from_millis(20))
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            temp_dir: TempDir::new().expect("Failed to create temp directory"),
            resolver: Arc::new(PlaylistResolver::default()),
            transcoder: Arc::new(FakeTranscoder::new(delay)),
        }
    }

    pub fn work_dir(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Config builder pointing at the harness work directory.
    pub fn config(&self) -> ConfigBuilder {
        ConfigBuilder::new(&self.work_dir().to_string_lossy())
    }

    /// Service wired to the harness resolver and transcoder.
    pub fn service(&self, config: Config) -> Mixtape {
        Mixtape::with_collaborators(config, self.resolver.clone(), self.transcoder.clone())
            .expect("Failed to build service")
    }

    /// Register a playlist of `count` items and return the item locators.
    /// Items are named `Song 1`, `Song 2`, ...
    pub fn add_playlist(&self, locator: &str, title: &str, count: usize) -> Vec<String> {
        let items: Vec<ResolvedItem> = (1..=count)
            .map(|i| {
                ResolvedItem::new(format!("{}/{}", locator, i)).with_title(format!("Song {}", i))
            })
            .collect();
        let locators = items.iter().map(|item| item.locator.clone()).collect();
        self.resolver.insert(
            locator,
            ResolvedPlaylist {
                title: Some(title.to_string()),
                items,
            },
        );
        locators
    }
}

// ─── Helpers ────────────────────────────────────────────────────────────────

/// Entry names of a zip archive, in archive order.
pub fn archive_entries(path: &Path) -> Vec<String> {
    let file = std::fs::File::open(path).expect("Failed to open archive");
    let mut archive = zip::ZipArchive::new(file).expect("Failed to read archive");
    (0..archive.len())
        .map(|i| archive.by_index(i).unwrap().name().to_string())
        .collect()
}

/// Poll `condition` until it holds, panicking after five seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub fn archive_path(service: &Mixtape, job_id: &str) -> PathBuf {
    service
        .job(job_id)
        .and_then(|job| job.archive_path())
        .expect("job has no archive")
}
