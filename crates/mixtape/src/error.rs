use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MixtapeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Resolve error: {0}")]
    Resolve(#[from] ResolveError),

    #[error("Transcode error: {0}")]
    Transcode(#[from] TranscodeError),

    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },
}

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("Unsupported source locator: {0}")]
    UnsupportedLocator(String),

    #[error("Failed to run resolver '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Resolver exited with {code:?}: {stderr}")]
    Failed { code: Option<i32>, stderr: String },

    #[error("Failed to parse resolver output: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Playlist contains no items")]
    Empty,
}

#[derive(Error, Debug)]
pub enum TranscodeError {
    #[error("Failed to run transcoder '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Transcoder exited with {code:?}: {stderr}")]
    Failed { code: Option<i32>, stderr: String },

    #[error("Transcoding cancelled")]
    Cancelled,

    #[error("Transcoder produced no output in '{0}'")]
    NoOutput(PathBuf),

    #[error("Invalid output file '{path}': {reason}")]
    InvalidOutput { path: PathBuf, reason: String },

    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Failed to create archive '{path}': {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to open archive '{path}': {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write archive '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("Failed to read entry source '{path}': {source}")]
    ReadSource {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Archive task failed: {0}")]
    TaskFailed(String),
}

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Archive not available for job {0}")]
    ArchiveNotAvailable(String),

    #[error("Failed to prepare working directory '{path}': {source}")]
    WorkDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, MixtapeError>;
