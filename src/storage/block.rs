use serde::{Deserialize, Serialize};
use std::fmt;

/// Block number of the pseudo-block used to lock the end of a file.
///
/// `Size` takes a shared lock on it and `Append` an exclusive one, so a
/// reader counting blocks never races a writer growing the file.
pub const END_OF_FILE: u64 = u64::MAX;

/// Identifies one block of one file by value.
///
/// Two independently built ids naming the same `(file, number)` pair are
/// equal and hash identically, so they collide in every map keyed by block.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockId {
    file_name: String,
    number: u64,
}

impl BlockId {
    pub fn new(file_name: impl Into<String>, number: u64) -> Self {
        Self {
            file_name: file_name.into(),
            number,
        }
    }

    /// The end-of-file pseudo-block of `file_name`.
    pub fn end_of_file(file_name: impl Into<String>) -> Self {
        Self::new(file_name, END_OF_FILE)
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn number(&self) -> u64 {
        self.number
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.number == END_OF_FILE {
            write!(f, "{}:eof", self.file_name)
        } else {
            write!(f, "{}:{}", self.file_name, self.number)
        }
    }
}
