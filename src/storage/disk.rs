pub mod file_manager;

pub use file_manager::{FileManager, TEMP_FILE_PREFIX};
