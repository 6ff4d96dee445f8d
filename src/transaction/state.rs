//! Transaction state management.

/// The possible states of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// The transaction is running and may read and write.
    Active,
    /// The transaction's COMMIT record is durable.
    Committed,
    /// The transaction undid its changes and logged ROLLBACK.
    RolledBack,
    /// The transaction ran crash recovery and logged a checkpoint.
    Recovered,
}

impl TransactionState {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    pub fn is_finished(&self) -> bool {
        !self.is_active()
    }
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Committed => write!(f, "committed"),
            Self::RolledBack => write!(f, "rolled back"),
            Self::Recovered => write!(f, "recovered"),
        }
    }
}
