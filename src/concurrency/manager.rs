//! Per-transaction view of the lock table.

use super::lock::{LockMode, LockResult, LockTable};
use crate::storage::BlockId;
use std::collections::HashMap;
use std::sync::Arc;

/// Tracks the locks one transaction holds and enforces strict two-phase
/// locking: locks are only acquired while the transaction runs and are all
/// released together by [`ConcurrencyManager::release`].
pub struct ConcurrencyManager {
    lock_table: Arc<LockTable>,
    locks: HashMap<BlockId, LockMode>,
}

impl ConcurrencyManager {
    pub fn new(lock_table: Arc<LockTable>) -> Self {
        Self {
            lock_table,
            locks: HashMap::new(),
        }
    }

    /// Ensures a shared (or stronger) lock on `block`.
    pub fn slock(&mut self, block: &BlockId) -> LockResult<()> {
        if !self.locks.contains_key(block) {
            self.lock_table.slock(block)?;
            self.locks.insert(block.clone(), LockMode::Shared);
        }
        Ok(())
    }

    /// Ensures an exclusive lock on `block`, upgrading a shared one if held.
    pub fn xlock(&mut self, block: &BlockId) -> LockResult<()> {
        match self.locks.get(block) {
            Some(LockMode::Exclusive) => return Ok(()),
            Some(LockMode::Shared) => self.lock_table.promote(block)?,
            None => self.lock_table.xlock(block)?,
        }
        self.locks.insert(block.clone(), LockMode::Exclusive);
        Ok(())
    }

    /// Releases every lock held.
    pub fn release(&mut self) {
        for (block, _) in self.locks.drain() {
            self.lock_table.unlock(&block);
        }
    }

    pub fn mode(&self, block: &BlockId) -> Option<LockMode> {
        self.locks.get(block).copied()
    }

    pub fn lock_count(&self) -> usize {
        self.locks.len()
    }
}
