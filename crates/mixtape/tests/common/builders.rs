//! Builder patterns for creating test data programmatically.

#![allow(dead_code)]

use mixtape::Config;

/// Builder for creating `Config` instances.
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder rooted at `work_directory`, with short timings
    /// suitable for tests.
    pub fn new(work_directory: &str) -> Self {
        let mut config = Config {
            work_directory: work_directory.to_string(),
            ..Config::default()
        };
        config.heartbeat_secs = 1;
        config.retention_secs = 60;
        config.retry.backoff_ms = 0;
        Self { config }
    }

    /// Set the number of concurrent item workers.
    pub fn worker_count(mut self, count: usize) -> Self {
        self.config.worker_count = count;
        self
    }

    /// Set the maximum number of items kept from a playlist.
    pub fn max_items(mut self, max: usize) -> Self {
        self.config.max_items = max;
        self
    }

    /// Set the retention window for idle jobs.
    pub fn retention_secs(mut self, secs: u64) -> Self {
        self.config.retention_secs = secs;
        self
    }

    /// Set the seconds-per-item used for wait estimates.
    pub fn estimated_item_secs(mut self, secs: u64) -> Self {
        self.config.estimated_item_secs = secs;
        self
    }

    /// Build the config.
    pub fn build(self) -> Config {
        self.config
    }
}
