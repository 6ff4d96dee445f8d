//! Storage layer for strata.
//!
//! Everything below the transaction boundary lives here:
//!
//! - **Page**: a block-sized byte area with typed accessors
//! - **FileManager**: raw block I/O against files in the database directory
//! - **LogManager**: the append-only write-ahead log and its backward iterator
//! - **BufferManager**: a fixed pool of pinned page buffers
//!
//! Pages flushed from the pool always have their log records on disk first.

pub mod block;
pub mod buffer;
pub mod disk;
pub mod error;
pub mod page;
pub mod wal;

pub use block::{BlockId, END_OF_FILE};
pub use buffer::{Buffer, BufferManager, SharedBuffer};
pub use disk::FileManager;
pub use error::{StorageError, StorageResult};
pub use page::Page;
pub use wal::{LogIterator, LogManager, Lsn};
