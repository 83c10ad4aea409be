//! Broadcasting of job progress events.
//!
//! A single broadcast channel carries the events of every job; per-job
//! streams filter it and add heartbeats.

pub mod job_progress;

pub use job_progress::{JobEventKind, JobProgressBroadcaster, JobProgressEvent, JobProgressTracker};
