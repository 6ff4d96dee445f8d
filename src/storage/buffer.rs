pub mod frame;

pub use frame::Buffer;

use crate::storage::disk::FileManager;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::wal::LogManager;
use crate::storage::BlockId;
use crate::transaction::TxNum;
use log::{debug, warn};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A pool slot shared between the pool and the transactions pinning it.
pub type SharedBuffer = Arc<Mutex<Buffer>>;

/// Fixed-size pool of buffers.
///
/// A block already resident is pinned in place; otherwise the first
/// unpinned buffer found is flushed and rebound to it. When every buffer is
/// pinned, `pin` sleeps on a condition variable until an `unpin` frees one
/// or the wait budget runs out.
pub struct BufferManager {
    pool: Vec<SharedBuffer>,
    available: Mutex<usize>,
    unpinned: Condvar,
    max_wait: Duration,
}

impl BufferManager {
    pub fn new(
        file_manager: Arc<FileManager>,
        log_manager: Arc<LogManager>,
        buffer_count: usize,
        max_wait: Duration,
    ) -> Self {
        let pool = (0..buffer_count)
            .map(|_| {
                Arc::new(Mutex::new(Buffer::new(
                    Arc::clone(&file_manager),
                    Arc::clone(&log_manager),
                )))
            })
            .collect();

        Self {
            pool,
            available: Mutex::new(buffer_count),
            unpinned: Condvar::new(),
            max_wait,
        }
    }

    /// Number of buffers with no pins.
    pub fn available(&self) -> usize {
        *self.available.lock()
    }

    pub fn capacity(&self) -> usize {
        self.pool.len()
    }

    /// Writes every page `txnum` left dirty.
    pub fn flush_all(&self, txnum: TxNum) -> StorageResult<()> {
        for buffer in &self.pool {
            let mut buffer = buffer.lock();
            if buffer.modifying_tx() == Some(txnum) {
                buffer.flush()?;
            }
        }
        Ok(())
    }

    /// Pins a buffer holding `block`, waiting at most the configured budget
    /// for one to become free.
    pub fn pin(&self, block: &BlockId) -> StorageResult<SharedBuffer> {
        let start = Instant::now();
        let deadline = start + self.max_wait;
        let mut available = self.available.lock();

        loop {
            if let Some(buffer) = self.try_pin(block, &mut available)? {
                return Ok(buffer);
            }

            debug!("all buffers pinned, waiting to pin {}", block);
            if self.unpinned.wait_until(&mut available, deadline).timed_out() {
                if let Some(buffer) = self.try_pin(block, &mut available)? {
                    return Ok(buffer);
                }
                warn!("gave up pinning {} after {:?}", block, start.elapsed());
                return Err(StorageError::BufferAbort {
                    block: block.clone(),
                    waited: start.elapsed(),
                });
            }
        }
    }

    pub fn unpin(&self, buffer: &SharedBuffer) {
        let mut available = self.available.lock();
        let mut buffer = buffer.lock();
        if !buffer.is_pinned() {
            return;
        }

        buffer.unpin();
        if !buffer.is_pinned() {
            *available += 1;
            self.unpinned.notify_all();
        }
    }

    fn try_pin(&self, block: &BlockId, available: &mut usize) -> StorageResult<Option<SharedBuffer>> {
        let buffer = match self.find_existing(block) {
            Some(buffer) => buffer,
            None => match self.choose_unpinned() {
                Some(buffer) => {
                    debug!("binding buffer to {}", block);
                    buffer.lock().assign_to_block(block.clone())?;
                    buffer
                }
                None => return Ok(None),
            },
        };

        {
            let mut guard = buffer.lock();
            if !guard.is_pinned() {
                *available -= 1;
            }
            guard.pin();
        }

        Ok(Some(buffer))
    }

    fn find_existing(&self, block: &BlockId) -> Option<SharedBuffer> {
        self.pool
            .iter()
            .find(|buffer| buffer.lock().block() == Some(block))
            .cloned()
    }

    fn choose_unpinned(&self) -> Option<SharedBuffer> {
        self.pool
            .iter()
            .find(|buffer| !buffer.lock().is_pinned())
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::wal::Lsn;
    use crate::storage::Page;
    use anyhow::Result;
    use std::thread;
    use tempfile::{tempdir, TempDir};

    const FILE_NAME: &str = "testfile";
    const TEST_OFFSET: usize = 5;

    struct Fixture {
        file_manager: Arc<FileManager>,
        log_manager: Arc<LogManager>,
        buffer_manager: Arc<BufferManager>,
        _dir: TempDir,
    }

    fn create_test_buffer_manager(buffers: usize, max_wait: Duration) -> Result<Fixture> {
        let dir = tempdir()?;
        let file_manager = Arc::new(FileManager::new(dir.path().join("buffertest"), 64)?);
        let log_manager = Arc::new(LogManager::new(Arc::clone(&file_manager), "logfile")?);
        let buffer_manager = Arc::new(BufferManager::new(
            Arc::clone(&file_manager),
            Arc::clone(&log_manager),
            buffers,
            max_wait,
        ));
        for _ in 0..3 {
            file_manager.append(FILE_NAME)?;
        }
        Ok(Fixture {
            file_manager,
            log_manager,
            buffer_manager,
            _dir: dir,
        })
    }

    fn block(n: u64) -> BlockId {
        BlockId::new(FILE_NAME, n)
    }

    #[test]
    fn test_eviction_flushes_previous_contents() -> Result<()> {
        let fx = create_test_buffer_manager(3, Duration::from_millis(200))?;
        let bm = &fx.buffer_manager;

        let buff1 = bm.pin(&block(1))?;
        {
            let mut b = buff1.lock();
            b.contents_mut().set_int(TEST_OFFSET, 123);
            b.set_modified(TxNum::new(1), Lsn::INVALID);
        }
        bm.pin(&block(2))?;
        bm.pin(&block(3))?;
        assert_eq!(bm.available(), 0);

        bm.unpin(&buff1);
        assert_eq!(bm.available(), 1);

        let buff4 = bm.pin(&block(4))?;
        assert_eq!(bm.available(), 0);
        assert_eq!(buff4.lock().block(), Some(&block(4)));

        let mut page = Page::new(64);
        fx.file_manager.read(&block(1), &mut page)?;
        assert_eq!(page.get_int(TEST_OFFSET), 123);

        Ok(())
    }

    #[test]
    fn test_repin_resident_block() -> Result<()> {
        let fx = create_test_buffer_manager(2, Duration::from_millis(200))?;
        let bm = &fx.buffer_manager;

        let a = bm.pin(&block(0))?;
        let b = bm.pin(&BlockId::new(FILE_NAME.to_string(), 0))?;
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.lock().pin_count(), 2);
        assert_eq!(bm.available(), 1);

        bm.unpin(&a);
        assert_eq!(bm.available(), 1);
        bm.unpin(&b);
        assert_eq!(bm.available(), 2);

        bm.unpin(&b);
        assert_eq!(bm.available(), 2);

        Ok(())
    }

    #[test]
    fn test_unpinned_block_is_pinned_in_place() -> Result<()> {
        let fx = create_test_buffer_manager(2, Duration::from_millis(200))?;
        let bm = &fx.buffer_manager;

        let first = bm.pin(&block(0))?;
        first.lock().contents_mut().set_int(0, 7);
        bm.unpin(&first);

        let again = bm.pin(&block(0))?;
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(again.lock().contents().get_int(0), 7);
        Ok(())
    }

    #[test]
    fn test_pin_times_out_when_pool_exhausted() -> Result<()> {
        let fx = create_test_buffer_manager(1, Duration::from_millis(100))?;
        let bm = &fx.buffer_manager;

        let _held = bm.pin(&block(0))?;
        let start = Instant::now();
        let result = bm.pin(&block(1));

        assert!(matches!(result, Err(StorageError::BufferAbort { .. })));
        assert!(start.elapsed() >= Duration::from_millis(100));
        assert_eq!(bm.available(), 0);
        Ok(())
    }

    #[test]
    fn test_unpin_wakes_waiting_pin() -> Result<()> {
        let fx = create_test_buffer_manager(1, Duration::from_secs(10))?;
        let held = fx.buffer_manager.pin(&block(0))?;

        let bm = Arc::clone(&fx.buffer_manager);
        let waiter = thread::spawn(move || {
            let start = Instant::now();
            let result = bm.pin(&block(1));
            (result.is_ok(), start.elapsed())
        });

        thread::sleep(Duration::from_millis(50));
        fx.buffer_manager.unpin(&held);

        let (pinned, waited) = waiter.join().unwrap();
        assert!(pinned);
        assert!(waited < Duration::from_secs(5));
        Ok(())
    }

    #[test]
    fn test_flush_all_only_touches_one_transaction() -> Result<()> {
        let fx = create_test_buffer_manager(3, Duration::from_millis(200))?;
        let bm = &fx.buffer_manager;

        let lsn = fx.log_manager.append(&[0u8; 8])?;
        let mine = bm.pin(&block(0))?;
        let theirs = bm.pin(&block(1))?;
        {
            let mut b = mine.lock();
            b.contents_mut().set_int(0, 11);
            b.set_modified(TxNum::new(1), lsn);
        }
        {
            let mut b = theirs.lock();
            b.contents_mut().set_int(0, 22);
            b.set_modified(TxNum::new(2), Lsn::INVALID);
        }

        bm.flush_all(TxNum::new(1))?;
        assert_eq!(fx.log_manager.last_saved_lsn(), lsn);

        let mut page = Page::new(64);
        fx.file_manager.read(&block(0), &mut page)?;
        assert_eq!(page.get_int(0), 11);
        fx.file_manager.read(&block(1), &mut page)?;
        assert_eq!(page.get_int(0), 0);
        assert_eq!(theirs.lock().modifying_tx(), Some(TxNum::new(2)));
        Ok(())
    }
}
