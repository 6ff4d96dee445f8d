use std::sync::Arc;

use crate::storage::disk::FileManager;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::INT_SIZE;
use crate::storage::{BlockId, Page};

/// Cursor over the log from the newest record back to the oldest.
///
/// Within a block, records sit at increasing offsets from newest to oldest;
/// once a block is exhausted the cursor reads the previous block, and it
/// stops after block 0.
pub struct LogIterator {
    file_manager: Arc<FileManager>,
    block: BlockId,
    page: Page,
    position: usize,
    done: bool,
}

impl LogIterator {
    pub(crate) fn new(file_manager: Arc<FileManager>, block: BlockId) -> StorageResult<Self> {
        let page = Page::new(file_manager.block_size());
        let position = page.len();
        let mut iter = Self {
            file_manager,
            block: block.clone(),
            page,
            position,
            done: false,
        };
        iter.move_to_block(block)?;
        Ok(iter)
    }

    /// Block currently mapped by the cursor.
    pub fn block(&self) -> &BlockId {
        &self.block
    }

    fn move_to_block(&mut self, block: BlockId) -> StorageResult<()> {
        self.file_manager.read(&block, &mut self.page)?;

        let boundary = self.page.get_int(0);
        if boundary < INT_SIZE as u64 || boundary > self.page.len() as u64 {
            return Err(StorageError::CorruptLogBlock { block, boundary });
        }

        self.position = boundary as usize;
        self.block = block;
        Ok(())
    }

    fn next_record(&mut self) -> StorageResult<Option<Vec<u8>>> {
        let block_size = self.page.len();

        while self.position >= block_size {
            if self.block.number() == 0 {
                return Ok(None);
            }
            let previous = BlockId::new(self.block.file_name(), self.block.number() - 1);
            self.move_to_block(previous)?;
        }

        let start = self.position + INT_SIZE;
        if start > block_size {
            return Err(self.corrupt());
        }
        let len = self.page.get_int(self.position) as usize;
        if len > block_size - start {
            return Err(self.corrupt());
        }

        let record = self.page.get_bytes(self.position);
        self.position = start + len;
        Ok(Some(record))
    }

    fn corrupt(&self) -> StorageError {
        StorageError::CorruptLogBlock {
            block: self.block.clone(),
            boundary: self.position as u64,
        }
    }
}

impl Iterator for LogIterator {
    type Item = StorageResult<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
