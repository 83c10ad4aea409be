use std::path::{Path, PathBuf};

use crate::sanitize::sanitize_stem;

/// On-disk layout of the working directory:
///
/// ```text
/// <root>/<job id>/<archive name>.zip
/// <root>/<job id>/items/<index>/...
/// ```
#[derive(Debug, Clone)]
pub struct WorkLayout {
    root: PathBuf,
}

impl WorkLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn job_dir(&self, job_id: &str) -> PathBuf {
        self.root.join(job_id)
    }

    pub fn item_dir(&self, job_id: &str, index: usize) -> PathBuf {
        self.job_dir(job_id).join("items").join(index.to_string())
    }

    pub fn archive_path(&self, job_id: &str, archive_name: &str) -> PathBuf {
        self.job_dir(job_id).join(archive_name)
    }

    /// Remove a job's directory and everything below it. Missing is fine.
    pub async fn remove_job_dir(&self, job_id: &str) -> std::io::Result<()> {
        remove_dir_if_exists(&self.job_dir(job_id)).await
    }
}

pub async fn remove_dir_if_exists(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Download file name for a job's archive, based on the playlist title.
pub fn archive_file_name(title: Option<&str>, job_id: &str) -> String {
    let stem = title.map(sanitize_stem).unwrap_or_default();
    if stem.is_empty() {
        let short: String = job_id.chars().take(8).collect();
        format!("mixtape-{}.zip", short)
    } else {
        format!("{}.zip", stem)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_layout_paths() {
        let layout = WorkLayout::new("/work");
        assert_eq!(layout.job_dir("abc"), PathBuf::from("/work/abc"));
        assert_eq!(layout.item_dir("abc", 7), PathBuf::from("/work/abc/items/7"));
        assert_eq!(
            layout.archive_path("abc", "Mix.zip"),
            PathBuf::from("/work/abc/Mix.zip")
        );
    }

    #[test]
    fn test_archive_file_name() {
        assert_eq!(archive_file_name(Some("Summer / Mix"), "id"), "Summer Mix.zip");
        assert_eq!(
            archive_file_name(None, "0123456789abcdef"),
            "mixtape-01234567.zip"
        );
        assert_eq!(archive_file_name(Some("..."), "abc"), "mixtape-abc.zip");
    }

    #[tokio::test]
    async fn test_remove_job_dir() {
        let dir = TempDir::new().unwrap();
        let layout = WorkLayout::new(dir.path());
        std::fs::create_dir_all(layout.item_dir("job", 1)).unwrap();
        std::fs::write(layout.archive_path("job", "a.zip"), b"x").unwrap();

        layout.remove_job_dir("job").await.unwrap();
        assert!(!layout.job_dir("job").exists());

        // second removal is a no-op
        layout.remove_job_dir("job").await.unwrap();
    }
}
