//! Recovery and crash resilience module.
//!
//! Transactions log START, their updates (with the overwritten value),
//! and COMMIT or ROLLBACK. Rollback and restart recovery both walk the log
//! backward and write old values back; nothing is ever redone.

pub mod log_record;
pub mod manager;

pub use log_record::{LogRecord, RecordError, RecordResult, RecordType};
pub use manager::RecoveryManager;
