//! The transaction handle clients program against.

use std::sync::Arc;

use log::{debug, warn};
use thiserror::Error;

use super::buffer_list::BufferList;
use super::id::TxNum;
use super::state::TransactionState;
use crate::concurrency::{ConcurrencyManager, LockError, LockTable};
use crate::recovery::{RecordError, RecoveryManager};
use crate::storage::{
    BlockId, BufferManager, FileManager, LogManager, Lsn, SharedBuffer, StorageError,
};

#[derive(Error, Debug)]
pub enum TransactionError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("corrupt log: {0}")]
    Record(#[from] RecordError),

    #[error("transaction {txnum} accessed {block} without pinning it")]
    BufferNotPinned { txnum: TxNum, block: BlockId },

    #[error("transaction {txnum} is already {state}")]
    NotActive {
        txnum: TxNum,
        state: TransactionState,
    },
}

pub type TransactionResult<T> = Result<T, TransactionError>;

/// The operations undo needs from a transaction.
pub trait TransactionOps {
    fn pin(&mut self, block: &BlockId) -> TransactionResult<()>;
    fn unpin(&mut self, block: &BlockId);
    fn set_int(&mut self, block: &BlockId, offset: usize, value: u64, log: bool)
        -> TransactionResult<()>;
    fn set_string(&mut self, block: &BlockId, offset: usize, value: &str, log: bool)
        -> TransactionResult<()>;
}

/// A unit of work over pinned blocks.
///
/// Reads take a shared lock and writes an exclusive lock on the block; all
/// locks and pins are held until [`Transaction::commit`] or
/// [`Transaction::rollback`]. Writes made with `log = true` append an undo
/// record before the page changes.
///
/// Dropping a transaction that is still active rolls it back before its
/// locks are released. If the rollback fails the pins and locks are still
/// released and restart recovery undoes the rest.
pub struct Transaction {
    txnum: TxNum,
    state: TransactionState,
    recovery: RecoveryManager,
    concurrency: ConcurrencyManager,
    buffers: BufferList,
    file_manager: Arc<FileManager>,
    buffer_manager: Arc<BufferManager>,
}

impl Transaction {
    /// Starts transaction `txnum`, logging its START record.
    pub fn new(
        txnum: TxNum,
        file_manager: Arc<FileManager>,
        log_manager: Arc<LogManager>,
        buffer_manager: Arc<BufferManager>,
        lock_table: Arc<LockTable>,
    ) -> TransactionResult<Self> {
        let recovery = RecoveryManager::new(txnum, log_manager, Arc::clone(&buffer_manager))?;
        debug!("transaction {} started", txnum);

        Ok(Self {
            txnum,
            state: TransactionState::Active,
            recovery,
            concurrency: ConcurrencyManager::new(lock_table),
            buffers: BufferList::new(Arc::clone(&buffer_manager)),
            file_manager,
            buffer_manager,
        })
    }

    pub fn txnum(&self) -> TxNum {
        self.txnum
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn commit(&mut self) -> TransactionResult<()> {
        self.ensure_active()?;
        self.recovery.commit()?;
        self.finish(TransactionState::Committed);
        Ok(())
    }

    pub fn rollback(&mut self) -> TransactionResult<()> {
        self.ensure_active()?;
        let recovery = self.recovery.clone();
        recovery.rollback(self)?;
        self.finish(TransactionState::RolledBack);
        Ok(())
    }

    /// Runs restart recovery over the whole log. No other transaction may
    /// be active.
    pub fn recover(&mut self) -> TransactionResult<()> {
        self.ensure_active()?;
        let recovery = self.recovery.clone();
        recovery.recover(self)?;
        self.finish(TransactionState::Recovered);
        Ok(())
    }

    pub fn pin(&mut self, block: &BlockId) -> TransactionResult<()> {
        self.ensure_active()?;
        self.buffers.pin(block)?;
        Ok(())
    }

    pub fn unpin(&mut self, block: &BlockId) {
        self.buffers.unpin(block);
    }

    pub fn get_int(&mut self, block: &BlockId, offset: usize) -> TransactionResult<u64> {
        let buffer = self.pinned(block)?;
        self.concurrency.slock(block)?;
        let value = buffer.lock().contents().get_int(offset);
        Ok(value)
    }

    pub fn get_string(&mut self, block: &BlockId, offset: usize) -> TransactionResult<String> {
        let buffer = self.pinned(block)?;
        self.concurrency.slock(block)?;
        let value = buffer.lock().contents().get_string(offset);
        Ok(value)
    }

    pub fn set_int(
        &mut self,
        block: &BlockId,
        offset: usize,
        value: u64,
        log: bool,
    ) -> TransactionResult<()> {
        let buffer = self.pinned(block)?;
        self.concurrency.xlock(block)?;

        let mut buffer = buffer.lock();
        let lsn = if log {
            let old_value = buffer.contents().get_int(offset);
            self.recovery.log_set_int(block, offset, old_value)?
        } else {
            Lsn::INVALID
        };
        buffer.contents_mut().set_int(offset, value);
        buffer.set_modified(self.txnum, lsn);
        Ok(())
    }

    pub fn set_string(
        &mut self,
        block: &BlockId,
        offset: usize,
        value: &str,
        log: bool,
    ) -> TransactionResult<()> {
        let buffer = self.pinned(block)?;
        self.concurrency.xlock(block)?;

        let mut buffer = buffer.lock();
        let lsn = if log {
            let old_value = buffer.contents().get_string(offset);
            self.recovery.log_set_string(block, offset, &old_value)?
        } else {
            Lsn::INVALID
        };
        buffer.contents_mut().set_string(offset, value);
        buffer.set_modified(self.txnum, lsn);
        Ok(())
    }

    /// Number of blocks in `file_name`. Locks the end of the file shared so
    /// no other transaction can append meanwhile.
    pub fn size(&mut self, file_name: &str) -> TransactionResult<u64> {
        self.ensure_active()?;
        self.concurrency.slock(&BlockId::end_of_file(file_name))?;
        Ok(self.file_manager.block_count(file_name)?)
    }

    /// Appends a zeroed block to `file_name`.
    pub fn append(&mut self, file_name: &str) -> TransactionResult<BlockId> {
        self.ensure_active()?;
        self.concurrency.xlock(&BlockId::end_of_file(file_name))?;
        Ok(self.file_manager.append(file_name)?)
    }

    pub fn block_size(&self) -> usize {
        self.file_manager.block_size()
    }

    pub fn available_buffers(&self) -> usize {
        self.buffer_manager.available()
    }

    fn ensure_active(&self) -> TransactionResult<()> {
        if self.state.is_active() {
            Ok(())
        } else {
            Err(TransactionError::NotActive {
                txnum: self.txnum,
                state: self.state,
            })
        }
    }

    fn pinned(&self, block: &BlockId) -> TransactionResult<SharedBuffer> {
        self.ensure_active()?;
        self.buffers
            .get_buffer(block)
            .cloned()
            .ok_or_else(|| TransactionError::BufferNotPinned {
                txnum: self.txnum,
                block: block.clone(),
            })
    }

    fn finish(&mut self, state: TransactionState) {
        self.state = state;
        self.concurrency.release();
        self.buffers.unpin_all();
    }
}

impl TransactionOps for Transaction {
    fn pin(&mut self, block: &BlockId) -> TransactionResult<()> {
        Transaction::pin(self, block)
    }

    fn unpin(&mut self, block: &BlockId) {
        Transaction::unpin(self, block)
    }

    fn set_int(
        &mut self,
        block: &BlockId,
        offset: usize,
        value: u64,
        log: bool,
    ) -> TransactionResult<()> {
        Transaction::set_int(self, block, offset, value, log)
    }

    fn set_string(
        &mut self,
        block: &BlockId,
        offset: usize,
        value: &str,
        log: bool,
    ) -> TransactionResult<()> {
        Transaction::set_string(self, block, offset, value, log)
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.state.is_active() {
            return;
        }

        debug!("transaction {} dropped while active, rolling back", self.txnum);
        if let Err(e) = self.rollback() {
            warn!(
                "rollback of dropped transaction {} failed, leaving it for recovery: {}",
                self.txnum, e
            );
            self.concurrency.release();
            self.buffers.unpin_all();
        }
    }
}
