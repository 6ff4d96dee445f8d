//! Block-level reader/writer locks.
//!
//! Each block that is locked or waited on gets a slot holding a signed
//! counter: `-1` means one exclusive holder, `0` free, `n > 0` that many
//! shared holders. Waiters sleep on the slot's condition variable and every
//! release wakes all of them so that several shared requests can be granted
//! at once.

use crate::storage::BlockId;
use dashmap::DashMap;
use log::{debug, warn};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

const EXCLUSIVE: i64 = -1;
const FREE: i64 = 0;

/// Lock modes supported by the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    /// Shared lock for read operations.
    Shared,
    /// Exclusive lock for write operations.
    Exclusive,
}

impl LockMode {
    /// Checks if this lock mode is compatible with another.
    pub fn is_compatible_with(&self, other: &LockMode) -> bool {
        matches!((self, other), (LockMode::Shared, LockMode::Shared))
    }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockMode::Shared => write!(f, "shared"),
            LockMode::Exclusive => write!(f, "exclusive"),
        }
    }
}

#[derive(Error, Debug)]
pub enum LockError {
    #[error("timed out after {waited:?} waiting for {mode} lock on {block}")]
    Timeout {
        block: BlockId,
        mode: LockMode,
        waited: Duration,
    },
}

pub type LockResult<T> = Result<T, LockError>;

#[derive(Default)]
struct LockSlot {
    state: Mutex<i64>,
    released: Condvar,
}

/// Lock table shared by every transaction of a database.
pub struct LockTable {
    slots: DashMap<BlockId, Arc<LockSlot>>,
    max_wait: Duration,
}

impl LockTable {
    pub fn new(max_wait: Duration) -> Self {
        Self {
            slots: DashMap::new(),
            max_wait,
        }
    }

    /// Takes a shared lock, waiting while another holder has it exclusively.
    pub fn slock(&self, block: &BlockId) -> LockResult<()> {
        self.acquire(block, LockMode::Shared, |state| state == EXCLUSIVE, |state| {
            *state += 1
        })
    }

    /// Takes an exclusive lock, waiting until nobody else holds the block.
    pub fn xlock(&self, block: &BlockId) -> LockResult<()> {
        self.acquire(block, LockMode::Exclusive, |state| state != FREE, |state| {
            *state = EXCLUSIVE
        })
    }

    /// Turns a shared lock the caller already holds into an exclusive one.
    /// Only the other shared holders are waited for.
    pub fn promote(&self, block: &BlockId) -> LockResult<()> {
        self.acquire(
            block,
            LockMode::Exclusive,
            |state| state > 1 || state == EXCLUSIVE,
            |state| *state = EXCLUSIVE,
        )
    }

    /// Releases one hold on `block` and wakes every waiter.
    ///
    /// A slot that ends up free and referenced by no waiter is dropped from
    /// the table, so the table only grows with blocks currently locked or
    /// waited on. The next request for that block creates a fresh slot.
    pub fn unlock(&self, block: &BlockId) {
        let slot = match self.slots.get(block) {
            Some(slot) => Arc::clone(slot.value()),
            None => return,
        };

        {
            let mut state = slot.state.lock();
            if *state > FREE {
                *state -= 1;
            } else {
                *state = FREE;
            }
            slot.released.notify_all();
        }
        drop(slot);

        self.slots.remove_if(block, |_, slot| {
            Arc::strong_count(slot) == 1 && *slot.state.lock() == FREE
        });
    }

    /// Number of shared holders of `block`.
    pub fn shared_holders(&self, block: &BlockId) -> usize {
        self.slots
            .get(block)
            .map(|slot| (*slot.state.lock()).max(FREE) as usize)
            .unwrap_or(0)
    }

    pub fn is_exclusive(&self, block: &BlockId) -> bool {
        self.slots
            .get(block)
            .map(|slot| *slot.state.lock() == EXCLUSIVE)
            .unwrap_or(false)
    }

    /// Number of blocks with a live slot.
    pub fn tracked_blocks(&self) -> usize {
        self.slots.len()
    }

    fn slot(&self, block: &BlockId) -> Arc<LockSlot> {
        Arc::clone(self.slots.entry(block.clone()).or_default().value())
    }

    fn acquire(
        &self,
        block: &BlockId,
        mode: LockMode,
        blocked: impl Fn(i64) -> bool,
        grant: impl FnOnce(&mut i64),
    ) -> LockResult<()> {
        let slot = self.slot(block);
        let start = Instant::now();
        let deadline = start + self.max_wait;

        let mut state = slot.state.lock();
        while blocked(*state) {
            debug!("waiting for {} lock on {}", mode, block);
            if slot.released.wait_until(&mut state, deadline).timed_out() && blocked(*state) {
                warn!("{} lock on {} timed out", mode, block);
                return Err(LockError::Timeout {
                    block: block.clone(),
                    mode,
                    waited: start.elapsed(),
                });
            }
        }

        grant(&mut state);
        Ok(())
    }
}
