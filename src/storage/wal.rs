//! Write-Ahead Logging (WAL) module.
//!
//! This module implements the write-ahead log for the kernel, providing:
//! - Log sequence number (LSN) assignment
//! - Appending opaque records into the in-memory tail block
//! - Flushing the tail block, optionally only when an LSN is not yet durable
//! - Reading every record back from newest to oldest

pub mod iterator;
pub mod manager;

pub use iterator::LogIterator;
pub use manager::{LogManager, Lsn};
