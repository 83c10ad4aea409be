pub mod broadcast;
pub mod config;
pub mod error;
pub mod process;
pub mod queue;
pub mod sanitize;
pub mod service;
pub mod source;
pub mod storage;
pub mod transcode;
pub mod worker;

pub use broadcast::{JobEventKind, JobProgressBroadcaster, JobProgressEvent, JobProgressTracker};
pub use config::{load_config, load_config_from_str, Config, RetryPolicy};
pub use error::{
    ArchiveError, ConfigError, MixtapeError, QueueError, ResolveError, Result, TranscodeError,
};
pub use queue::{JobRegistry, QueueManager, Reaper};
pub use service::{CancelReceipt, Mixtape, SubmitReceipt};
pub use source::{CommandResolver, ResolvedItem, ResolvedPlaylist, SourceResolver, StaticResolver};
pub use storage::{ArchiveBuilder, WorkLayout};
pub use transcode::{CommandTranscoder, TranscodeRequest, TranscodedTrack, Transcoder};
pub use worker::{
    ItemOutcome, ItemReport, Job, JobSnapshot, JobStatus, JobWatch, WorkItem, WorkerPool,
};
