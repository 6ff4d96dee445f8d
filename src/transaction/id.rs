//! Transaction number allocation.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Number identifying a transaction in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TxNum(pub u64);

impl TxNum {
    pub fn new(num: u64) -> Self {
        Self(num)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for TxNum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Thread-safe, monotonically increasing source of transaction numbers.
///
/// One allocator is owned by each open database; it is seeded from the log
/// so numbers are not reused across restarts.
pub struct TxNumAllocator {
    next: AtomicU64,
}

impl TxNumAllocator {
    /// Creates an allocator whose first number is 1.
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Creates an allocator that continues after `last`.
    pub fn starting_after(last: TxNum) -> Self {
        Self {
            next: AtomicU64::new(last.value() + 1),
        }
    }

    pub fn next(&self) -> TxNum {
        TxNum::new(self.next.fetch_add(1, Ordering::SeqCst))
    }

    /// Most recently issued number, or 0 if none was issued yet.
    pub fn last_issued(&self) -> TxNum {
        TxNum::new(self.next.load(Ordering::SeqCst).saturating_sub(1))
    }
}

impl Default for TxNumAllocator {
    fn default() -> Self {
        Self::new()
    }
}
