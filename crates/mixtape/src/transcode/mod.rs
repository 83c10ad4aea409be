//! Converting one remote item into a local audio file.

pub mod command;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

use crate::error::TranscodeError;

pub use command::CommandTranscoder;

#[derive(Debug, Clone)]
pub struct TranscodeRequest {
    pub index: usize,
    pub locator: String,
    /// Item-scoped directory the output must be written into.
    pub output_dir: PathBuf,
}

/// A produced file plus any metadata the transcoder learned on the way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodedTrack {
    pub path: PathBuf,
    pub title: Option<String>,
    pub artist: Option<String>,
}

impl TranscodedTrack {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            title: None,
            artist: None,
        }
    }

    /// `artist - title`, title alone, or `fallback`.
    pub fn entry_stem(&self, fallback: &str) -> String {
        let title = self.title.as_deref().map(str::trim).filter(|s| !s.is_empty());
        let artist = self.artist.as_deref().map(str::trim).filter(|s| !s.is_empty());
        match (artist, title) {
            (Some(artist), Some(title)) => format!("{} - {}", artist, title),
            (None, Some(title)) => title.to_string(),
            _ => fallback.to_string(),
        }
    }
}

/// Implementations must stop work and return `TranscodeError::Cancelled`
/// promptly once `cancel` fires.
#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn transcode(
        &self,
        request: &TranscodeRequest,
        cancel: &CancellationToken,
    ) -> Result<TranscodedTrack, TranscodeError>;

    /// Extension of produced files, without the dot.
    fn extension(&self) -> &str {
        "mp3"
    }
}

/// Check that `path` is a regular non-empty file and, for `.mp3`, that it
/// starts with an ID3 tag or an MPEG frame sync.
pub async fn validate_output(path: &Path) -> Result<(), TranscodeError> {
    let invalid = |reason: &str| TranscodeError::InvalidOutput {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };
    let io_err = |source| TranscodeError::Io {
        path: path.to_path_buf(),
        source,
    };

    let metadata = tokio::fs::metadata(path).await.map_err(io_err)?;
    if !metadata.is_file() {
        return Err(invalid("not a regular file"));
    }
    if metadata.len() == 0 {
        return Err(invalid("empty file"));
    }

    let is_mp3 = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("mp3"));
    if !is_mp3 {
        return Ok(());
    }

    let mut header = [0u8; 3];
    let mut file = tokio::fs::File::open(path).await.map_err(io_err)?;
    let read = file.read(&mut header).await.map_err(io_err)?;
    let header = &header[..read];

    let id3 = header.starts_with(b"ID3");
    let frame_sync = header.len() >= 2 && header[0] == 0xFF && header[1] & 0xE0 == 0xE0;
    if id3 || frame_sync {
        Ok(())
    } else {
        Err(invalid("missing ID3 tag or MPEG frame sync"))
    }
}
