use std::collections::HashMap;
use std::sync::Arc;

use log::debug;

use crate::storage::{BlockId, BufferManager, SharedBuffer, StorageResult};

/// Buffers pinned by one transaction.
///
/// A block pinned several times stays mapped until every pin is released.
pub struct BufferList {
    buffer_manager: Arc<BufferManager>,
    buffers: HashMap<BlockId, SharedBuffer>,
    pins: Vec<BlockId>,
}

impl BufferList {
    pub fn new(buffer_manager: Arc<BufferManager>) -> Self {
        Self {
            buffer_manager,
            buffers: HashMap::new(),
            pins: Vec::new(),
        }
    }

    pub fn get_buffer(&self, block: &BlockId) -> Option<&SharedBuffer> {
        self.buffers.get(block)
    }

    pub fn pin(&mut self, block: &BlockId) -> StorageResult<()> {
        let buffer = self.buffer_manager.pin(block)?;
        self.buffers.insert(block.clone(), buffer);
        self.pins.push(block.clone());
        Ok(())
    }

    pub fn unpin(&mut self, block: &BlockId) {
        let position = match self.pins.iter().position(|pinned| pinned == block) {
            Some(position) => position,
            None => {
                debug!("ignoring unpin of {}, not pinned", block);
                return;
            }
        };

        self.pins.remove(position);
        if let Some(buffer) = self.buffers.get(block) {
            self.buffer_manager.unpin(buffer);
        }
        if !self.pins.contains(block) {
            self.buffers.remove(block);
        }
    }

    /// Releases every pin, leaving the list empty.
    pub fn unpin_all(&mut self) {
        for block in self.pins.drain(..) {
            if let Some(buffer) = self.buffers.get(&block) {
                self.buffer_manager.unpin(buffer);
            }
        }
        self.buffers.clear();
    }

    pub fn pin_count(&self, block: &BlockId) -> usize {
        self.pins.iter().filter(|pinned| *pinned == block).count()
    }
}
