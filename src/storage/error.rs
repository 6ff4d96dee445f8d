//! Storage layer error types.

use std::time::Duration;

use thiserror::Error;

use crate::storage::BlockId;

/// Errors that can occur in the storage layer.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// No buffer became unpinned within the wait budget. The caller should
    /// abort its transaction and retry later.
    #[error("No buffer available for {block} after waiting {waited:?}, potential deadlock")]
    BufferAbort { block: BlockId, waited: Duration },

    #[error("Log record of {size} bytes can never fit in a log block (capacity {capacity})")]
    LogRecordTooLarge { size: usize, capacity: usize },

    #[error("Corrupt log block {block}: record boundary {boundary} is out of range")]
    CorruptLogBlock { block: BlockId, boundary: u64 },
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
