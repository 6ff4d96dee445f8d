use std::sync::Arc;

use crate::storage::disk::FileManager;
use crate::storage::error::StorageResult;
use crate::storage::wal::{LogManager, Lsn};
use crate::storage::{BlockId, Page};
use crate::transaction::TxNum;

/// One slot of the buffer pool: a page, the block it mirrors, and who
/// pinned and modified it.
pub struct Buffer {
    file_manager: Arc<FileManager>,
    log_manager: Arc<LogManager>,
    contents: Page,
    block: Option<BlockId>,
    pins: u32,
    modified_by: Option<TxNum>,
    lsn: Lsn,
}

impl Buffer {
    pub fn new(file_manager: Arc<FileManager>, log_manager: Arc<LogManager>) -> Self {
        let contents = Page::new(file_manager.block_size());
        Self {
            file_manager,
            log_manager,
            contents,
            block: None,
            pins: 0,
            modified_by: None,
            lsn: Lsn::INVALID,
        }
    }

    pub fn contents(&self) -> &Page {
        &self.contents
    }

    pub fn contents_mut(&mut self) -> &mut Page {
        &mut self.contents
    }

    pub fn block(&self) -> Option<&BlockId> {
        self.block.as_ref()
    }

    /// Records that `txnum` changed the page. Must be called after every
    /// write to [`Buffer::contents_mut`]; an invalid `lsn` (an unlogged
    /// change) keeps the LSN of the previous logged change.
    pub fn set_modified(&mut self, txnum: TxNum, lsn: Lsn) {
        self.modified_by = Some(txnum);
        if !lsn.is_invalid() {
            self.lsn = lsn;
        }
    }

    pub fn is_pinned(&self) -> bool {
        self.pins > 0
    }

    pub fn pin_count(&self) -> u32 {
        self.pins
    }

    /// Transaction holding an unflushed change to this page, if any.
    pub fn modifying_tx(&self) -> Option<TxNum> {
        self.modified_by
    }

    /// LSN of the newest logged change to this page.
    pub fn lsn(&self) -> Lsn {
        self.lsn
    }

    /// Writes out the current page if it is dirty, then loads `block`.
    pub(crate) fn assign_to_block(&mut self, block: BlockId) -> StorageResult<()> {
        self.flush()?;
        if let Err(e) = self.file_manager.read(&block, &mut self.contents) {
            self.block = None;
            return Err(e);
        }
        self.block = Some(block);
        self.pins = 0;
        Ok(())
    }

    /// Writes a dirty page back to its block. The log is forced up to the
    /// page's LSN first, so a change never reaches disk before its record.
    pub(crate) fn flush(&mut self) -> StorageResult<()> {
        if self.modified_by.is_none() {
            return Ok(());
        }
        self.log_manager.flush_to(self.lsn)?;
        if let Some(block) = &self.block {
            self.file_manager.write(block, &self.contents)?;
        }
        self.modified_by = None;
        Ok(())
    }

    pub(crate) fn pin(&mut self) {
        self.pins += 1;
    }

    pub(crate) fn unpin(&mut self) {
        self.pins = self.pins.saturating_sub(1);
    }
}
