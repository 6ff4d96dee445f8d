use crate::storage::error::StorageResult;
use crate::storage::{BlockId, Page};
use log::debug;
use parking_lot::Mutex;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Prefix of scratch files; any left in the directory at startup are
/// leftovers of a crashed run and get deleted.
pub const TEMP_FILE_PREFIX: &str = "temp";

/// Block-granular I/O over the flat files of one database directory.
///
/// Every operation runs inside a single critical section, so reads, writes
/// and appends on all files are serialized.
pub struct FileManager {
    db_dir: PathBuf,
    block_size: usize,
    is_new: bool,
    open_files: Mutex<HashMap<String, File>>,
}

impl FileManager {
    pub fn new(db_dir: impl AsRef<Path>, block_size: usize) -> StorageResult<Self> {
        let db_dir = db_dir.as_ref().to_path_buf();
        let is_new = !db_dir.exists();

        if is_new {
            fs::create_dir_all(&db_dir)?;
            debug!("created database directory {:?}", db_dir);
        } else {
            Self::purge_temp_files(&db_dir)?;
        }

        Ok(Self {
            db_dir,
            block_size,
            is_new,
            open_files: Mutex::new(HashMap::new()),
        })
    }

    /// Reads block `blk` into `page` and returns the number of bytes read.
    ///
    /// A block at or past the end of the file reads as zeros.
    pub fn read(&self, blk: &BlockId, page: &mut Page) -> StorageResult<usize> {
        let mut files = self.open_files.lock();
        let file = self.file_for(&mut files, blk.file_name())?;
        file.seek(SeekFrom::Start(self.block_offset(blk)))?;

        let buf = page.contents_mut();
        let mut read = 0;
        while read < buf.len() {
            match file.read(&mut buf[read..]) {
                Ok(0) => break,
                Ok(n) => read += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        buf[read..].fill(0);

        Ok(read)
    }

    /// Writes `page` to block `blk`, extending the file if needed.
    pub fn write(&self, blk: &BlockId, page: &Page) -> StorageResult<usize> {
        let mut files = self.open_files.lock();
        let file = self.file_for(&mut files, blk.file_name())?;
        file.seek(SeekFrom::Start(self.block_offset(blk)))?;
        file.write_all(page.contents())?;
        file.sync_data()?;

        Ok(page.len())
    }

    /// Grows `file_name` by one zero-filled block and returns its id.
    pub fn append(&self, file_name: &str) -> StorageResult<BlockId> {
        let mut files = self.open_files.lock();
        let file = self.file_for(&mut files, file_name)?;

        let number = file.metadata()?.len() / self.block_size as u64;
        let blk = BlockId::new(file_name, number);

        file.seek(SeekFrom::Start(self.block_offset(&blk)))?;
        file.write_all(&vec![0u8; self.block_size])?;
        file.sync_data()?;

        Ok(blk)
    }

    /// Number of whole blocks in `file_name`; a missing file is created empty.
    pub fn block_count(&self, file_name: &str) -> StorageResult<u64> {
        let mut files = self.open_files.lock();
        let file = self.file_for(&mut files, file_name)?;
        Ok(file.metadata()?.len() / self.block_size as u64)
    }

    pub fn is_file_empty(&self, file_name: &str) -> StorageResult<bool> {
        Ok(self.block_count(file_name)? == 0)
    }

    /// True when the directory did not exist before this manager created it.
    pub fn is_new(&self) -> bool {
        self.is_new
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn db_dir(&self) -> &Path {
        &self.db_dir
    }

    fn block_offset(&self, blk: &BlockId) -> u64 {
        blk.number() * self.block_size as u64
    }

    fn file_for<'a>(
        &self,
        files: &'a mut HashMap<String, File>,
        file_name: &str,
    ) -> StorageResult<&'a mut File> {
        match files.entry(file_name.to_string()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let file = OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .truncate(false)
                    .open(self.db_dir.join(file_name))?;
                Ok(entry.insert(file))
            }
        }
    }

    fn purge_temp_files(db_dir: &Path) -> StorageResult<()> {
        for entry in fs::read_dir(db_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if entry
                .file_name()
                .to_string_lossy()
                .starts_with(TEMP_FILE_PREFIX)
            {
                debug!("removing leftover temporary file {:?}", entry.path());
                fs::remove_file(entry.path())?;
            }
        }
        Ok(())
    }
}
