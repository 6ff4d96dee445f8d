//! Log record formats.
//!
//! Every record starts with an 8-byte opcode followed by its fields, each
//! integer 8 bytes little-endian and each string length-prefixed, the same
//! encoding [`Page`] uses:
//!
//! | Type       | Layout                                              |
//! |------------|-----------------------------------------------------|
//! | CHECKPOINT | `[op]`                                              |
//! | START      | `[op][txnum]`                                       |
//! | COMMIT     | `[op][txnum]`                                       |
//! | ROLLBACK   | `[op][txnum]`                                       |
//! | SETINT     | `[op][txnum][file][block][offset][old int]`         |
//! | SETSTRING  | `[op][txnum][file][block][offset][old string]`      |

use std::fmt;

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

use crate::storage::page::{max_length_for_str, INT_SIZE};
use crate::storage::{BlockId, LogManager, Lsn, Page, StorageResult};
use crate::transaction::{TransactionOps, TransactionResult, TxNum};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum RecordType {
    Checkpoint = 0,
    Start = 1,
    Commit = 2,
    Rollback = 3,
    SetInt = 4,
    SetString = 5,
}

impl TryFrom<u64> for RecordType {
    type Error = RecordError;

    fn try_from(op: u64) -> Result<Self, Self::Error> {
        match op {
            0 => Ok(RecordType::Checkpoint),
            1 => Ok(RecordType::Start),
            2 => Ok(RecordType::Commit),
            3 => Ok(RecordType::Rollback),
            4 => Ok(RecordType::SetInt),
            5 => Ok(RecordType::SetString),
            other => Err(RecordError::UnknownRecordType(other)),
        }
    }
}

#[derive(Error, Debug)]
pub enum RecordError {
    #[error("unknown log record type {0}")]
    UnknownRecordType(u64),

    #[error("{record_type:?} log record truncated: needed {needed} bytes, {available} available")]
    Truncated {
        record_type: Option<RecordType>,
        needed: usize,
        available: usize,
    },
}

pub type RecordResult<T> = Result<T, RecordError>;

/// A decoded log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRecord {
    Checkpoint,
    Start {
        txnum: TxNum,
    },
    Commit {
        txnum: TxNum,
    },
    Rollback {
        txnum: TxNum,
    },
    SetInt {
        txnum: TxNum,
        block: BlockId,
        offset: usize,
        old_value: u64,
    },
    SetString {
        txnum: TxNum,
        block: BlockId,
        offset: usize,
        old_value: String,
    },
}

impl LogRecord {
    pub fn decode(bytes: &[u8]) -> RecordResult<Self> {
        let mut reader = FieldReader::new(bytes);
        let record_type = RecordType::try_from(reader.int()?)?;
        reader.record_type = Some(record_type);

        let record = match record_type {
            RecordType::Checkpoint => LogRecord::Checkpoint,
            RecordType::Start => LogRecord::Start {
                txnum: TxNum::new(reader.int()?),
            },
            RecordType::Commit => LogRecord::Commit {
                txnum: TxNum::new(reader.int()?),
            },
            RecordType::Rollback => LogRecord::Rollback {
                txnum: TxNum::new(reader.int()?),
            },
            RecordType::SetInt => {
                let txnum = TxNum::new(reader.int()?);
                let block = reader.block()?;
                let offset = reader.int()? as usize;
                LogRecord::SetInt {
                    txnum,
                    block,
                    offset,
                    old_value: reader.int()?,
                }
            }
            RecordType::SetString => {
                let txnum = TxNum::new(reader.int()?);
                let block = reader.block()?;
                let offset = reader.int()? as usize;
                LogRecord::SetString {
                    txnum,
                    block,
                    offset,
                    old_value: reader.string()?,
                }
            }
        };
        Ok(record)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut page = Page::new(self.encoded_len());
        page.set_int(0, self.record_type() as u64);

        match self {
            LogRecord::Checkpoint => {}
            LogRecord::Start { txnum }
            | LogRecord::Commit { txnum }
            | LogRecord::Rollback { txnum } => page.set_int(INT_SIZE, txnum.value()),
            LogRecord::SetInt {
                txnum,
                block,
                offset,
                old_value,
            } => {
                let pos = write_update_header(&mut page, *txnum, block, *offset);
                page.set_int(pos, *old_value);
            }
            LogRecord::SetString {
                txnum,
                block,
                offset,
                old_value,
            } => {
                let pos = write_update_header(&mut page, *txnum, block, *offset);
                page.set_string(pos, old_value);
            }
        }

        page.into_bytes()
    }

    /// Appends the encoded record to the log.
    pub fn write_to(&self, log_manager: &LogManager) -> StorageResult<Lsn> {
        log_manager.append(&self.encode())
    }

    pub fn record_type(&self) -> RecordType {
        match self {
            LogRecord::Checkpoint => RecordType::Checkpoint,
            LogRecord::Start { .. } => RecordType::Start,
            LogRecord::Commit { .. } => RecordType::Commit,
            LogRecord::Rollback { .. } => RecordType::Rollback,
            LogRecord::SetInt { .. } => RecordType::SetInt,
            LogRecord::SetString { .. } => RecordType::SetString,
        }
    }

    /// Owning transaction; checkpoints belong to none.
    pub fn txnum(&self) -> Option<TxNum> {
        match self {
            LogRecord::Checkpoint => None,
            LogRecord::Start { txnum }
            | LogRecord::Commit { txnum }
            | LogRecord::Rollback { txnum }
            | LogRecord::SetInt { txnum, .. }
            | LogRecord::SetString { txnum, .. } => Some(*txnum),
        }
    }

    /// Restores the value an update record overwrote. The write goes
    /// through `tx` unlogged; all other record types do nothing.
    pub fn undo<T: TransactionOps + ?Sized>(&self, tx: &mut T) -> TransactionResult<()> {
        match self {
            LogRecord::SetInt {
                block,
                offset,
                old_value,
                ..
            } => {
                tx.pin(block)?;
                let result = tx.set_int(block, *offset, *old_value, false);
                tx.unpin(block);
                result
            }
            LogRecord::SetString {
                block,
                offset,
                old_value,
                ..
            } => {
                tx.pin(block)?;
                let result = tx.set_string(block, *offset, old_value, false);
                tx.unpin(block);
                result
            }
            _ => Ok(()),
        }
    }

    fn encoded_len(&self) -> usize {
        match self {
            LogRecord::Checkpoint => INT_SIZE,
            LogRecord::Start { .. } | LogRecord::Commit { .. } | LogRecord::Rollback { .. } => {
                2 * INT_SIZE
            }
            LogRecord::SetInt { block, .. } => update_header_len(block) + INT_SIZE,
            LogRecord::SetString {
                block, old_value, ..
            } => update_header_len(block) + max_length_for_str(old_value),
        }
    }
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogRecord::Checkpoint => write!(f, "<CHECKPOINT>"),
            LogRecord::Start { txnum } => write!(f, "<START {}>", txnum),
            LogRecord::Commit { txnum } => write!(f, "<COMMIT {}>", txnum),
            LogRecord::Rollback { txnum } => write!(f, "<ROLLBACK {}>", txnum),
            LogRecord::SetInt {
                txnum,
                block,
                offset,
                old_value,
            } => write!(f, "<SETINT {} {} {} {}>", txnum, block, offset, old_value),
            LogRecord::SetString {
                txnum,
                block,
                offset,
                old_value,
            } => write!(f, "<SETSTRING {} {} {} {}>", txnum, block, offset, old_value),
        }
    }
}

fn update_header_len(block: &BlockId) -> usize {
    2 * INT_SIZE + max_length_for_str(block.file_name()) + 2 * INT_SIZE
}

/// Writes `[txnum][file][block][offset]` after the opcode and returns the
/// position of the old value.
fn write_update_header(page: &mut Page, txnum: TxNum, block: &BlockId, offset: usize) -> usize {
    let mut pos = INT_SIZE;
    page.set_int(pos, txnum.value());
    pos += INT_SIZE;
    page.set_string(pos, block.file_name());
    pos += max_length_for_str(block.file_name());
    page.set_int(pos, block.number());
    pos += INT_SIZE;
    page.set_int(pos, offset as u64);
    pos + INT_SIZE
}

/// Bounds-checked field cursor over a raw record.
struct FieldReader<'a> {
    bytes: &'a [u8],
    position: usize,
    record_type: Option<RecordType>,
}

impl<'a> FieldReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            position: 0,
            record_type: None,
        }
    }

    fn take(&mut self, len: usize) -> RecordResult<&'a [u8]> {
        let available = self.bytes.len() - self.position;
        if len > available {
            return Err(RecordError::Truncated {
                record_type: self.record_type,
                needed: len,
                available,
            });
        }
        let field = &self.bytes[self.position..self.position + len];
        self.position += len;
        Ok(field)
    }

    fn int(&mut self) -> RecordResult<u64> {
        Ok(LittleEndian::read_u64(self.take(INT_SIZE)?))
    }

    fn string(&mut self) -> RecordResult<String> {
        let len = self.int()?;
        let len = usize::try_from(len).unwrap_or(usize::MAX);
        Ok(String::from_utf8_lossy(self.take(len)?).into_owned())
    }

    fn block(&mut self) -> RecordResult<BlockId> {
        let file_name = self.string()?;
        Ok(BlockId::new(file_name, self.int()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::FileManager;
    use crate::transaction::TransactionError;
    use anyhow::Result;
    use std::sync::Arc;
    use tempfile::tempdir;

    /// Applies undo writes straight to one page.
    struct PageStub {
        page: Page,
        pinned: Vec<BlockId>,
        unpinned: Vec<BlockId>,
    }

    impl PageStub {
        fn new(page: Page) -> Self {
            Self {
                page,
                pinned: Vec::new(),
                unpinned: Vec::new(),
            }
        }
    }

    impl TransactionOps for PageStub {
        fn pin(&mut self, block: &BlockId) -> TransactionResult<()> {
            self.pinned.push(block.clone());
            Ok(())
        }

        fn unpin(&mut self, block: &BlockId) {
            self.unpinned.push(block.clone());
        }

        fn set_int(
            &mut self,
            _block: &BlockId,
            offset: usize,
            value: u64,
            log: bool,
        ) -> TransactionResult<()> {
            assert!(!log);
            self.page.set_int(offset, value);
            Ok(())
        }

        fn set_string(
            &mut self,
            _block: &BlockId,
            offset: usize,
            value: &str,
            log: bool,
        ) -> TransactionResult<()> {
            assert!(!log);
            self.page.set_string(offset, value);
            Ok(())
        }
    }

    fn decode_latest(log_manager: &LogManager) -> Result<LogRecord> {
        let raw = log_manager
            .iter()?
            .next()
            .ok_or_else(|| anyhow::anyhow!("log is empty"))??;
        Ok(LogRecord::decode(&raw)?)
    }

    #[test]
    fn test_start_record() -> Result<()> {
        let dir = tempdir()?;
        let file_manager = Arc::new(FileManager::new(dir.path().join("recordtest"), 400)?);
        let log_manager = LogManager::new(file_manager, "record_file")?;

        let record = LogRecord::Start {
            txnum: TxNum::new(13),
        };
        assert_eq!(record.to_string(), "<START 13>");
        record.write_to(&log_manager)?;

        let raw = log_manager.iter()?.next().unwrap()?;
        assert_eq!(raw.len(), 16);
        assert_eq!(LittleEndian::read_u64(&raw[0..8]), RecordType::Start as u64);
        assert_eq!(LittleEndian::read_u64(&raw[8..16]), 13);
        Ok(())
    }

    #[test]
    fn test_set_string_record_and_undo() -> Result<()> {
        let dir = tempdir()?;
        let file_manager = Arc::new(FileManager::new(dir.path().join("recordtest"), 400)?);
        let log_manager = LogManager::new(file_manager, "record_file")?;

        let block = BlockId::new("dummy_id", 1);
        LogRecord::SetString {
            txnum: TxNum::new(1),
            block: block.clone(),
            offset: 13,
            old_value: "original string".to_string(),
        }
        .write_to(&log_manager)?;

        let record = decode_latest(&log_manager)?;
        assert_eq!(record.to_string(), "<SETSTRING 1 dummy_id:1 13 original string>");
        assert_eq!(record.txnum(), Some(TxNum::new(1)));

        let mut page = Page::new(400);
        page.set_string(13, "modify string 1");
        page.set_string(13, "modify string 2");
        let mut stub = PageStub::new(page);

        record.undo(&mut stub)?;

        assert_eq!(stub.page.get_string(13), "original string");
        assert_eq!(stub.pinned, vec![block.clone()]);
        assert_eq!(stub.unpinned, vec![block]);
        Ok(())
    }

    #[test]
    fn test_set_int_record_and_undo() -> Result<()> {
        let record = LogRecord::SetInt {
            txnum: TxNum::new(7),
            block: BlockId::new("data", 3),
            offset: 80,
            old_value: 9_999,
        };
        let decoded = LogRecord::decode(&record.encode())?;
        assert_eq!(decoded, record);
        assert_eq!(decoded.to_string(), "<SETINT 7 data:3 80 9999>");

        let mut page = Page::new(128);
        page.set_int(80, 1);
        let mut stub = PageStub::new(page);
        decoded.undo(&mut stub)?;
        assert_eq!(stub.page.get_int(80), 9_999);
        Ok(())
    }

    #[test]
    fn test_control_records() -> Result<()> {
        assert_eq!(LogRecord::Checkpoint.encode().len(), 8);
        assert_eq!(LogRecord::Checkpoint.to_string(), "<CHECKPOINT>");
        assert_eq!(LogRecord::Checkpoint.txnum(), None);

        let commit = LogRecord::decode(&LogRecord::Commit { txnum: TxNum::new(13) }.encode())?;
        assert_eq!(commit.to_string(), "<COMMIT 13>");
        let rollback =
            LogRecord::decode(&LogRecord::Rollback { txnum: TxNum::new(2) }.encode())?;
        assert_eq!(rollback.to_string(), "<ROLLBACK 2>");

        let mut stub = PageStub::new(Page::new(16));
        commit.undo(&mut stub)?;
        assert!(stub.pinned.is_empty());
        Ok(())
    }

    #[test]
    fn test_unknown_opcode_is_rejected() {
        let mut raw = vec![0u8; 16];
        LittleEndian::write_u64(&mut raw[0..8], 42);
        assert!(matches!(
            LogRecord::decode(&raw),
            Err(RecordError::UnknownRecordType(42))
        ));
    }

    #[test]
    fn test_truncated_record_is_rejected() {
        let full = LogRecord::SetString {
            txnum: TxNum::new(1),
            block: BlockId::new("f", 0),
            offset: 0,
            old_value: "abcdef".to_string(),
        }
        .encode();

        let err = LogRecord::decode(&full[..full.len() - 2]).unwrap_err();
        assert!(matches!(
            err,
            RecordError::Truncated {
                record_type: Some(RecordType::SetString),
                needed: 6,
                available: 4,
            }
        ));
        assert!(matches!(
            LogRecord::decode(&[1, 2, 3]),
            Err(RecordError::Truncated { record_type: None, .. })
        ));
    }

    #[test]
    fn test_undo_stops_on_pin_failure() {
        struct FailingPin;

        impl TransactionOps for FailingPin {
            fn pin(&mut self, block: &BlockId) -> TransactionResult<()> {
                Err(TransactionError::BufferNotPinned {
                    txnum: TxNum::new(1),
                    block: block.clone(),
                })
            }
            fn unpin(&mut self, _block: &BlockId) {
                panic!("unpin without pin");
            }
            fn set_int(&mut self, _: &BlockId, _: usize, _: u64, _: bool) -> TransactionResult<()> {
                panic!("write without pin");
            }
            fn set_string(
                &mut self,
                _: &BlockId,
                _: usize,
                _: &str,
                _: bool,
            ) -> TransactionResult<()> {
                panic!("write without pin");
            }
        }

        let record = LogRecord::SetInt {
            txnum: TxNum::new(1),
            block: BlockId::new("f", 0),
            offset: 0,
            old_value: 1,
        };
        assert!(record.undo(&mut FailingPin).is_err());
    }
}
