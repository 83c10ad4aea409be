//! Append-only zip archive shared by all items of one job.
//!
//! Every append reopens the file in add mode, writes one `Stored` entry and
//! rewrites the central directory, so the archive is a valid zip after each
//! successful append. Appends are serialized by a per-archive mutex that is
//! held across the whole blocking write.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::ArchiveError;

#[derive(Debug, Default)]
struct ArchiveState {
    /// Lowercased names, so entries stay distinct on case-insensitive filesystems.
    taken: HashSet<String>,
    entries: Vec<String>,
}

impl ArchiveState {
    fn unique_name(&self, requested: &str) -> String {
        if !self.taken.contains(&requested.to_lowercase()) {
            return requested.to_string();
        }

        let (stem, ext) = match requested.rfind('.') {
            Some(dot) if dot > 0 => requested.split_at(dot),
            _ => (requested, ""),
        };

        (2..)
            .map(|n| format!("{} ({}){}", stem, n, ext))
            .find(|candidate| !self.taken.contains(&candidate.to_lowercase()))
            .unwrap_or_else(|| requested.to_string())
    }

    fn record(&mut self, name: &str) {
        self.taken.insert(name.to_lowercase());
        self.entries.push(name.to_string());
    }
}

#[derive(Debug, Clone)]
pub struct ArchiveBuilder {
    path: PathBuf,
    state: Arc<Mutex<ArchiveState>>,
}

fn entry_options() -> SimpleFileOptions {
    SimpleFileOptions::default().compression_method(CompressionMethod::Stored)
}

fn create_empty(path: &Path) -> Result<(), ArchiveError> {
    let file = File::create(path).map_err(|e| ArchiveError::Create {
        path: path.to_path_buf(),
        source: e,
    })?;
    ZipWriter::new(file)
        .finish()
        .map_err(|e| ArchiveError::Write {
            path: path.to_path_buf(),
            source: e,
        })?;
    Ok(())
}

fn append_blocking(path: &Path, source: &Path, entry_name: &str) -> Result<(), ArchiveError> {
    let write_err = |e| ArchiveError::Write {
        path: path.to_path_buf(),
        source: e,
    };

    let mut input = File::open(source).map_err(|e| ArchiveError::ReadSource {
        path: source.to_path_buf(),
        source: e,
    })?;

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .map_err(|e| ArchiveError::Open {
            path: path.to_path_buf(),
            source: e,
        })?;

    let mut writer = ZipWriter::new_append(file).map_err(write_err)?;
    writer
        .start_file(entry_name, entry_options())
        .map_err(write_err)?;

    if let Err(e) = std::io::copy(&mut input, &mut writer) {
        // Drop the half-written entry but keep the archive readable
        let _ = writer.abort_file();
        let _ = writer.finish();
        return Err(ArchiveError::ReadSource {
            path: source.to_path_buf(),
            source: e,
        });
    }

    writer.finish().map_err(write_err)?;
    Ok(())
}

impl ArchiveBuilder {
    /// Create a new, empty archive at `path`, replacing any existing file.
    pub async fn create(path: impl Into<PathBuf>) -> Result<Self, ArchiveError> {
        let path = path.into();
        let target = path.clone();
        tokio::task::spawn_blocking(move || create_empty(&target))
            .await
            .map_err(|e| ArchiveError::TaskFailed(e.to_string()))??;

        log::debug!("Created archive {}", path.display());

        Ok(Self {
            path,
            state: Arc::new(Mutex::new(ArchiveState::default())),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `source` as a new entry and return the name it was stored
    /// under, which differs from `entry_name` when that name is taken.
    pub async fn append(
        &self,
        source: impl AsRef<Path>,
        entry_name: &str,
    ) -> Result<String, ArchiveError> {
        let guard = self.state.clone().lock_owned().await;
        let name = guard.unique_name(entry_name);

        let archive = self.path.clone();
        let source = source.as_ref().to_path_buf();
        let stored = name.clone();

        let (mut guard, result) = tokio::task::spawn_blocking(move || {
            let result = append_blocking(&archive, &source, &stored);
            (guard, result)
        })
        .await
        .map_err(|e| ArchiveError::TaskFailed(e.to_string()))?;

        result?;
        guard.record(&name);
        Ok(name)
    }

    pub async fn entry_count(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    /// Entry names in the order they were appended.
    pub async fn entries(&self) -> Vec<String> {
        self.state.lock().await.entries.clone()
    }

    /// Wait for any in-flight append and return the archive path.
    pub async fn finalize(&self) -> PathBuf {
        let _guard = self.state.lock().await;
        self.path.clone()
    }
}
