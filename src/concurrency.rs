//! Concurrency control module.
//!
//! Transactions isolate each other with block-level shared/exclusive locks
//! held until commit or rollback (strict two-phase locking). Waits are
//! bounded: a request that cannot be granted in time fails instead of
//! deadlocking.

pub mod lock;
pub mod manager;

pub use lock::{LockError, LockMode, LockResult, LockTable};
pub use manager::ConcurrencyManager;
