//! Transaction management module.
//!
//! A [`Transaction`] combines three per-transaction helpers:
//! - a [`BufferList`] of the blocks it has pinned
//! - a lock ledger enforcing strict two-phase locking
//! - a recovery manager logging undo records and finishing records

pub mod buffer_list;
pub mod handle;
pub mod id;
pub mod state;

pub use buffer_list::BufferList;
pub use handle::{Transaction, TransactionError, TransactionOps, TransactionResult};
pub use id::{TxNum, TxNumAllocator};
pub use state::TransactionState;
