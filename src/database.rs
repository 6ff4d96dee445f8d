use crate::concurrency::LockTable;
use crate::recovery::LogRecord;
use crate::storage::{BufferManager, FileManager, LogManager};
use crate::transaction::{Transaction, TransactionResult, TxNum, TxNumAllocator};
use log::info;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Settings for opening a database directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub db_dir: PathBuf,
    pub block_size: usize,
    pub buffer_count: usize,
    pub log_file: String,
    /// Longest a pin or lock request waits before failing.
    pub wait_timeout: Duration,
}

impl DatabaseConfig {
    pub fn new(db_dir: impl Into<PathBuf>) -> Self {
        Self {
            db_dir: db_dir.into(),
            ..Self::default()
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            db_dir: PathBuf::from("./strata_data"),
            block_size: 400,
            buffer_count: 8,
            log_file: "strata.log".to_string(),
            wait_timeout: Duration::from_secs(10),
        }
    }
}

/// An open database: the shared file, log, buffer and lock managers.
pub struct Database {
    config: DatabaseConfig,
    file_manager: Arc<FileManager>,
    log_manager: Arc<LogManager>,
    buffer_manager: Arc<BufferManager>,
    lock_table: Arc<LockTable>,
    tx_numbers: TxNumAllocator,
}

impl Database {
    /// Opens the database at `config.db_dir`, creating it if missing. An
    /// existing database is recovered before this returns.
    pub fn open(config: DatabaseConfig) -> TransactionResult<Self> {
        let file_manager = Arc::new(FileManager::new(&config.db_dir, config.block_size)?);
        let log_manager = Arc::new(LogManager::new(
            Arc::clone(&file_manager),
            config.log_file.clone(),
        )?);
        let buffer_manager = Arc::new(BufferManager::new(
            Arc::clone(&file_manager),
            Arc::clone(&log_manager),
            config.buffer_count,
            config.wait_timeout,
        ));
        let lock_table = Arc::new(LockTable::new(config.wait_timeout));

        let is_new = file_manager.is_new();
        let last_txnum = if is_new {
            TxNum::new(0)
        } else {
            highest_txnum(&log_manager)?
        };

        let db = Self {
            config,
            file_manager,
            log_manager,
            buffer_manager,
            lock_table,
            tx_numbers: TxNumAllocator::starting_after(last_txnum),
        };

        if is_new {
            info!("created new database in {}", db.config.db_dir.display());
        } else {
            info!(
                "recovering database in {} (last transaction {})",
                db.config.db_dir.display(),
                last_txnum
            );
            db.recover()?;
        }
        Ok(db)
    }

    /// Starts a new transaction.
    pub fn begin(&self) -> TransactionResult<Transaction> {
        Transaction::new(
            self.tx_numbers.next(),
            Arc::clone(&self.file_manager),
            Arc::clone(&self.log_manager),
            Arc::clone(&self.buffer_manager),
            Arc::clone(&self.lock_table),
        )
    }

    /// Undoes unfinished transactions and writes a checkpoint. Callers must
    /// make sure no other transaction is active.
    pub fn recover(&self) -> TransactionResult<()> {
        let mut tx = self.begin()?;
        tx.recover()
    }

    /// Every log record, newest first.
    pub fn log_records(&self) -> TransactionResult<Vec<LogRecord>> {
        let mut records = Vec::new();
        for raw in self.log_manager.iter()? {
            records.push(LogRecord::decode(&raw?)?);
        }
        Ok(records)
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn file_manager(&self) -> &Arc<FileManager> {
        &self.file_manager
    }

    pub fn log_manager(&self) -> &Arc<LogManager> {
        &self.log_manager
    }

    pub fn buffer_manager(&self) -> &Arc<BufferManager> {
        &self.buffer_manager
    }

    pub fn lock_table(&self) -> &Arc<LockTable> {
        &self.lock_table
    }
}

fn highest_txnum(log_manager: &LogManager) -> TransactionResult<TxNum> {
    let mut highest = TxNum::new(0);
    for raw in log_manager.iter()? {
        if let Some(txnum) = LogRecord::decode(&raw?)?.txnum() {
            highest = highest.max(txnum);
        }
    }
    Ok(highest)
}
