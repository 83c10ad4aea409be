pub mod manager;
pub mod reaper;
pub mod registry;

pub use manager::QueueManager;
pub use reaper::Reaper;
pub use registry::JobRegistry;
