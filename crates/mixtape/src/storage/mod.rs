pub mod archive;
pub mod workspace;

pub use archive::ArchiveBuilder;
pub use workspace::{archive_file_name, remove_dir_if_exists, WorkLayout};
