pub mod job;
pub mod pool;
pub mod processor;

pub use job::{ItemOutcome, ItemReport, Job, JobCounts, JobSnapshot, JobStatus, JobWatch, WorkItem};
pub use pool::{PoolSummary, WorkerPool};
pub use processor::ItemProcessor;
