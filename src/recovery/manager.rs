use std::collections::HashSet;
use std::sync::Arc;

use log::{debug, info};

use super::log_record::LogRecord;
use crate::storage::{BlockId, BufferManager, LogManager, Lsn, StorageResult};
use crate::transaction::{TransactionOps, TransactionResult, TxNum};

/// Writes one transaction's log records and undoes its work.
///
/// Recovery is undo-only: an update record carries the value it replaced,
/// and a change is reverted by writing that value back unlogged.
#[derive(Clone)]
pub struct RecoveryManager {
    txnum: TxNum,
    log_manager: Arc<LogManager>,
    buffer_manager: Arc<BufferManager>,
}

impl RecoveryManager {
    /// Logs START for `txnum`.
    pub fn new(
        txnum: TxNum,
        log_manager: Arc<LogManager>,
        buffer_manager: Arc<BufferManager>,
    ) -> StorageResult<Self> {
        LogRecord::Start { txnum }.write_to(&log_manager)?;
        Ok(Self {
            txnum,
            log_manager,
            buffer_manager,
        })
    }

    /// Flushes the transaction's pages, then makes COMMIT durable.
    pub fn commit(&self) -> StorageResult<()> {
        self.buffer_manager.flush_all(self.txnum)?;
        let lsn = LogRecord::Commit { txnum: self.txnum }.write_to(&self.log_manager)?;
        self.log_manager.flush_to(lsn)?;
        info!("transaction {} committed at {}", self.txnum, lsn);
        Ok(())
    }

    /// Undoes every change of this transaction, newest first, then logs
    /// ROLLBACK.
    pub fn rollback<T: TransactionOps + ?Sized>(&self, tx: &mut T) -> TransactionResult<()> {
        for raw in self.log_manager.iter()? {
            let record = LogRecord::decode(&raw?)?;
            if record.txnum() != Some(self.txnum) {
                continue;
            }
            if let LogRecord::Start { .. } = record {
                break;
            }
            debug!("undoing {}", record);
            record.undo(tx)?;
        }

        self.buffer_manager.flush_all(self.txnum)?;
        let lsn = LogRecord::Rollback { txnum: self.txnum }.write_to(&self.log_manager)?;
        self.log_manager.flush_to(lsn)?;
        info!("transaction {} rolled back", self.txnum);
        Ok(())
    }

    /// Undoes every transaction that never logged COMMIT or ROLLBACK, then
    /// writes a checkpoint. The backward scan stops at the previous
    /// checkpoint. Must run while no other transaction is active.
    pub fn recover<T: TransactionOps + ?Sized>(&self, tx: &mut T) -> TransactionResult<()> {
        let mut finished = HashSet::new();
        let mut undone = 0usize;

        for raw in self.log_manager.iter()? {
            let record = LogRecord::decode(&raw?)?;
            match record {
                LogRecord::Checkpoint => break,
                LogRecord::Commit { txnum } | LogRecord::Rollback { txnum } => {
                    finished.insert(txnum);
                }
                ref other => {
                    if let Some(txnum) = other.txnum() {
                        if !finished.contains(&txnum) {
                            debug!("undoing {}", other);
                            other.undo(tx)?;
                            undone += 1;
                        }
                    }
                }
            }
        }

        self.buffer_manager.flush_all(self.txnum)?;
        let lsn = LogRecord::Checkpoint.write_to(&self.log_manager)?;
        self.log_manager.flush_to(lsn)?;
        info!("recovery undid {} updates, checkpoint at {}", undone, lsn);
        Ok(())
    }

    /// Logs the value about to be overwritten at `offset` of `block`.
    pub fn log_set_int(&self, block: &BlockId, offset: usize, old_value: u64) -> StorageResult<Lsn> {
        LogRecord::SetInt {
            txnum: self.txnum,
            block: block.clone(),
            offset,
            old_value,
        }
        .write_to(&self.log_manager)
    }

    /// Logs the string about to be overwritten at `offset` of `block`.
    pub fn log_set_string(
        &self,
        block: &BlockId,
        offset: usize,
        old_value: &str,
    ) -> StorageResult<Lsn> {
        LogRecord::SetString {
            txnum: self.txnum,
            block: block.clone(),
            offset,
            old_value: old_value.to_string(),
        }
        .write_to(&self.log_manager)
    }

    pub fn txnum(&self) -> TxNum {
        self.txnum
    }
}
