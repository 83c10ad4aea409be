use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    #[serde(default = "default_work_directory")]
    pub work_directory: String,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default = "default_max_items")]
    pub max_items: usize,
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
    #[serde(default = "default_reaper_interval_secs")]
    pub reaper_interval_secs: u64,
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
    #[serde(default = "default_estimated_item_secs")]
    pub estimated_item_secs: u64,
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
    #[serde(default)]
    pub transcoder: TranscoderConfig,
    #[serde(default)]
    pub resolver: ResolverConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub server: ServerConfig,
}

fn default_work_directory() -> String {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("mixtape")
        .to_string_lossy()
        .into_owned()
}

fn default_worker_count() -> usize {
    1
}

fn default_max_items() -> usize {
    100
}

fn default_retention_secs() -> u64 {
    3600
}

fn default_reaper_interval_secs() -> u64 {
    300
}

fn default_heartbeat_secs() -> u64 {
    15
}

fn default_estimated_item_secs() -> u64 {
    45
}

fn default_event_capacity() -> usize {
    256
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            work_directory: default_work_directory(),
            worker_count: default_worker_count(),
            max_items: default_max_items(),
            retention_secs: default_retention_secs(),
            reaper_interval_secs: default_reaper_interval_secs(),
            heartbeat_secs: default_heartbeat_secs(),
            estimated_item_secs: default_estimated_item_secs(),
            event_capacity: default_event_capacity(),
            transcoder: TranscoderConfig::default(),
            resolver: ResolverConfig::default(),
            retry: RetryPolicy::default(),
            server: ServerConfig::default(),
        }
    }
}

impl Config {
    pub fn work_directory(&self) -> PathBuf {
        PathBuf::from(&self.work_directory)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval_secs)
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }
}

/// External program that downloads and converts a single item.
///
/// `args` is a template; `{locator}`, `{output_dir}`, `{format}`, `{bitrate}`
/// and `{socket_timeout}` are substituted per invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscoderConfig {
    #[serde(default = "default_program")]
    pub program: String,
    #[serde(default = "default_transcoder_args")]
    pub args: Vec<String>,
    #[serde(default = "default_format")]
    pub format: String,
    #[serde(default = "default_bitrate")]
    pub bitrate: String,
}

fn default_program() -> String {
    "yt-dlp".to_string()
}

fn default_transcoder_args() -> Vec<String> {
    [
        "--no-playlist",
        "-x",
        "--audio-format",
        "{format}",
        "--audio-quality",
        "{bitrate}",
        "--embed-metadata",
        "--socket-timeout",
        "{socket_timeout}",
        "--no-progress",
        "--print",
        r#"after_move:{"title":%(title)j,"artist":%(artist,uploader)j}"#,
        "-o",
        "{output_dir}/track.%(ext)s",
        "{locator}",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_format() -> String {
    "mp3".to_string()
}

fn default_bitrate() -> String {
    "128K".to_string()
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: default_transcoder_args(),
            format: default_format(),
            bitrate: default_bitrate(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    #[serde(default = "default_program")]
    pub program: String,
    #[serde(default = "default_resolver_args")]
    pub args: Vec<String>,
}

fn default_resolver_args() -> Vec<String> {
    [
        "--flat-playlist",
        "--dump-single-json",
        "--socket-timeout",
        "{socket_timeout}",
        "{locator}",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: default_resolver_args(),
        }
    }
}

/// Retry behaviour for external programs. Attempt `n` (1-based) that fails
/// is followed by a sleep of `n * backoff_ms` before the next one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    #[serde(default = "default_socket_timeout_secs")]
    pub socket_timeout_secs: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    2000
}

fn default_socket_timeout_secs() -> u64 {
    30
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
            socket_timeout_secs: default_socket_timeout_secs(),
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt following failed attempt `attempt`.
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_ms.saturating_mul(u64::from(attempt)))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}
