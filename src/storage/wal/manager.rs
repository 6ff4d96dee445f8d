//! Log manager implementation.
//!
//! The log is a file of fixed-size blocks. Each block starts with an 8-byte
//! boundary (the offset of its newest record); records are packed from the
//! end of the block toward its start, each with an 8-byte length prefix:
//!
//! ```text
//! | boundary | free ... | len N | rec N | ... | len 1 | rec 1 | len 0 | rec 0 |
//! | 8B       |          ^ boundary                                          |
//! ```
//!
//! Exactly one in-memory page mirrors the tail block, whatever the size of
//! the file, so all appends and flushes go through one mutex.

use std::fmt;
use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::iterator::LogIterator;
use crate::storage::disk::FileManager;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::INT_SIZE;
use crate::storage::{BlockId, Page};

/// Log Sequence Number: position of a record in the order records were
/// appended by this process. The first record appended gets `Lsn(1)`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Lsn(pub u64);

impl Lsn {
    /// Marks a modification that was never logged.
    pub const INVALID: Lsn = Lsn(0);

    pub fn next(&self) -> Self {
        Lsn(self.0 + 1)
    }

    pub fn is_invalid(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LSN({})", self.0)
    }
}

struct LogTail {
    page: Page,
    block: BlockId,
    latest_lsn: Lsn,
    last_saved_lsn: Lsn,
}

/// Append-only write-ahead log over one file of the database directory.
pub struct LogManager {
    file_manager: Arc<FileManager>,
    log_file: String,
    tail: Mutex<LogTail>,
}

impl LogManager {
    /// Opens the log, mapping its last block into memory, or allocates the
    /// first block of an empty log.
    pub fn new(file_manager: Arc<FileManager>, log_file: impl Into<String>) -> StorageResult<Self> {
        let log_file = log_file.into();
        let mut page = Page::new(file_manager.block_size());

        let block_count = file_manager.block_count(&log_file)?;
        let block = if block_count == 0 {
            Self::append_new_block(&file_manager, &log_file, &mut page)?
        } else {
            let block = BlockId::new(log_file.as_str(), block_count - 1);
            file_manager.read(&block, &mut page)?;

            let boundary = page.get_int(0);
            if boundary < INT_SIZE as u64 || boundary > page.len() as u64 {
                return Err(StorageError::CorruptLogBlock { block, boundary });
            }
            block
        };

        Ok(Self {
            file_manager,
            log_file,
            tail: Mutex::new(LogTail {
                page,
                block,
                latest_lsn: Lsn::INVALID,
                last_saved_lsn: Lsn::INVALID,
            }),
        })
    }

    /// Appends `record` to the tail page and returns its LSN.
    ///
    /// When the tail block cannot hold the record, it is written out and a
    /// fresh block is appended and mapped first. Nothing is forced to disk
    /// otherwise; see [`LogManager::flush_to`].
    pub fn append(&self, record: &[u8]) -> StorageResult<Lsn> {
        let block_size = self.file_manager.block_size();
        let bytes_needed = record.len() + INT_SIZE;
        if bytes_needed + INT_SIZE > block_size {
            return Err(StorageError::LogRecordTooLarge {
                size: record.len(),
                capacity: block_size.saturating_sub(2 * INT_SIZE),
            });
        }

        let mut guard = self.tail.lock();
        let tail = &mut *guard;

        let mut boundary = tail.page.get_int(0) as usize;
        if boundary < bytes_needed + INT_SIZE {
            self.file_manager.write(&tail.block, &tail.page)?;
            tail.block = Self::append_new_block(&self.file_manager, &self.log_file, &mut tail.page)?;
            boundary = tail.page.get_int(0) as usize;
            debug!("log rolled over to block {}", tail.block);
        }

        let record_pos = boundary - bytes_needed;
        tail.page.set_bytes(record_pos, record);
        tail.page.set_int(0, record_pos as u64);
        tail.latest_lsn = tail.latest_lsn.next();

        Ok(tail.latest_lsn)
    }

    /// Writes the tail page to its block. The boundary, the mapped block and
    /// the LSN counters are left untouched.
    pub fn flush(&self) -> StorageResult<()> {
        let tail = self.tail.lock();
        self.file_manager.write(&tail.block, &tail.page)?;
        Ok(())
    }

    /// Makes every record up to `lsn` durable. A no-op when `lsn` was
    /// already covered by an earlier flush.
    pub fn flush_to(&self, lsn: Lsn) -> StorageResult<()> {
        let mut tail = self.tail.lock();
        if lsn > tail.last_saved_lsn {
            self.file_manager.write(&tail.block, &tail.page)?;
            tail.last_saved_lsn = tail.latest_lsn;
        }
        Ok(())
    }

    /// Flushes the tail, then returns a cursor yielding every record from
    /// newest to oldest.
    pub fn iter(&self) -> StorageResult<LogIterator> {
        let tail = self.tail.lock();
        self.file_manager.write(&tail.block, &tail.page)?;
        LogIterator::new(Arc::clone(&self.file_manager), tail.block.clone())
    }

    pub fn latest_lsn(&self) -> Lsn {
        self.tail.lock().latest_lsn
    }

    pub fn last_saved_lsn(&self) -> Lsn {
        self.tail.lock().last_saved_lsn
    }

    pub fn log_file(&self) -> &str {
        &self.log_file
    }

    fn append_new_block(
        file_manager: &FileManager,
        log_file: &str,
        page: &mut Page,
    ) -> StorageResult<BlockId> {
        let block = file_manager.append(log_file)?;
        page.contents_mut().fill(0);
        page.set_int(0, file_manager.block_size() as u64);
        file_manager.write(&block, page)?;
        Ok(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::page::max_length_for_str;
    use anyhow::Result;
    use tempfile::{tempdir, TempDir};

    fn create_test_log_manager(block_size: usize) -> Result<(LogManager, Arc<FileManager>, TempDir)> {
        let dir = tempdir()?;
        let file_manager = Arc::new(FileManager::new(dir.path().join("log_test"), block_size)?);
        let log_manager = LogManager::new(Arc::clone(&file_manager), "logfile")?;
        Ok((log_manager, file_manager, dir))
    }

    fn make_record(text: &str, n: u64) -> Vec<u8> {
        let int_pos = max_length_for_str(text);
        let mut page = Page::from_bytes(vec![0u8; int_pos + INT_SIZE]);
        page.set_string(0, text);
        page.set_int(int_pos, n);
        page.into_bytes()
    }

    fn disk_boundary(file_manager: &FileManager, block: u64) -> Result<u64> {
        let mut page = Page::new(file_manager.block_size());
        file_manager.read(&BlockId::new("logfile", block), &mut page)?;
        Ok(page.get_int(0))
    }

    #[test]
    fn test_lsn_generation() {
        assert!(Lsn::INVALID.is_invalid());
        assert_eq!(Lsn::INVALID.next(), Lsn(1));
        assert!(Lsn(3) > Lsn(2));
        assert_eq!(Lsn(7).to_string(), "LSN(7)");
    }

    #[test]
    fn test_new_log_has_one_empty_block() -> Result<()> {
        let (log_manager, file_manager, _dir) = create_test_log_manager(200)?;
        assert_eq!(file_manager.block_count("logfile")?, 1);
        assert_eq!(disk_boundary(&file_manager, 0)?, 200);
        assert_eq!(log_manager.iter()?.count(), 0);
        Ok(())
    }

    #[test]
    fn test_records_read_back_newest_first_across_blocks() -> Result<()> {
        let (log_manager, file_manager, _dir) = create_test_log_manager(200)?;

        for i in 0..=30u64 {
            let lsn = log_manager.append(&make_record(&format!("record{}", i), i))?;
            assert_eq!(lsn, Lsn(i + 1));
        }
        assert!(file_manager.block_count("logfile")? > 1);

        let mut expected = 30u64;
        let mut seen = 0;
        for record in log_manager.iter()? {
            let page = Page::from_bytes(record?);
            let text = page.get_string(0);
            assert_eq!(text, format!("record{}", expected));
            assert_eq!(page.get_int(max_length_for_str(&text)), expected);
            expected = expected.wrapping_sub(1);
            seen += 1;
        }
        assert_eq!(seen, 31);

        Ok(())
    }

    #[test]
    fn test_flush_to_is_idempotent_for_saved_lsns() -> Result<()> {
        let (log_manager, file_manager, _dir) = create_test_log_manager(200)?;

        let first = log_manager.append(&make_record("a", 1))?;
        assert_eq!(disk_boundary(&file_manager, 0)?, 200);

        log_manager.flush_to(first)?;
        let after_first = disk_boundary(&file_manager, 0)?;
        assert!(after_first < 200);
        assert_eq!(log_manager.last_saved_lsn(), first);

        let second = log_manager.append(&make_record("b", 2))?;
        log_manager.flush_to(first)?;
        assert_eq!(disk_boundary(&file_manager, 0)?, after_first);

        log_manager.flush_to(second)?;
        assert!(disk_boundary(&file_manager, 0)? < after_first);
        assert_eq!(log_manager.last_saved_lsn(), second);

        Ok(())
    }

    #[test]
    fn test_flush_keeps_counters() -> Result<()> {
        let (log_manager, _file_manager, _dir) = create_test_log_manager(200)?;
        log_manager.append(&make_record("x", 9))?;
        log_manager.flush()?;
        assert_eq!(log_manager.latest_lsn(), Lsn(1));
        assert_eq!(log_manager.last_saved_lsn(), Lsn::INVALID);
        Ok(())
    }

    #[test]
    fn test_record_too_large() -> Result<()> {
        let (log_manager, _file_manager, _dir) = create_test_log_manager(64)?;

        assert!(log_manager.append(&[7u8; 48]).is_ok());
        let err = log_manager.append(&[7u8; 49]).unwrap_err();
        assert!(matches!(
            err,
            StorageError::LogRecordTooLarge { size: 49, capacity: 48 }
        ));

        Ok(())
    }

    #[test]
    fn test_reopen_continues_tail_block() -> Result<()> {
        let dir = tempdir()?;
        let db_dir = dir.path().join("db");
        {
            let file_manager = Arc::new(FileManager::new(&db_dir, 200)?);
            let log_manager = LogManager::new(Arc::clone(&file_manager), "logfile")?;
            log_manager.append(&make_record("old", 1))?;
            log_manager.flush()?;
        }

        let file_manager = Arc::new(FileManager::new(&db_dir, 200)?);
        let log_manager = LogManager::new(Arc::clone(&file_manager), "logfile")?;
        assert_eq!(log_manager.append(&make_record("new", 2))?, Lsn(1));

        let texts: Vec<String> = log_manager
            .iter()?
            .map(|r| r.map(|bytes| Page::from_bytes(bytes).get_string(0)))
            .collect::<StorageResult<_>>()?;
        assert_eq!(texts, vec!["new".to_string(), "old".to_string()]);
        assert_eq!(file_manager.block_count("logfile")?, 1);

        Ok(())
    }

    #[test]
    fn test_corrupt_tail_block_is_rejected() -> Result<()> {
        let dir = tempdir()?;
        let file_manager = Arc::new(FileManager::new(dir.path().join("db"), 64)?);
        file_manager.append("logfile")?;

        let result = LogManager::new(Arc::clone(&file_manager), "logfile");
        assert!(matches!(
            result,
            Err(StorageError::CorruptLogBlock { boundary: 0, .. })
        ));

        Ok(())
    }
}
