use crate::types::Pid;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, KindredError>;

#[derive(Debug, Error)]
pub enum KindredError {
    #[error("Storage error: {0}")]
    Storage(#[from] redb::Error),

    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("Storage operation error: {0}")]
    StorageOperation(#[from] redb::StorageError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Reference could not be resolved: {0}")]
    ReferenceNotResolvable(String),

    #[error("Purge requires a resolvable identifier: {0}")]
    IdentifierResolutionRequired(String),

    /// A caller invoked automatic reconciliation against a link a human has
    /// already curated, or tried to record an automatic non-match. Fatal;
    /// the caller must be fixed, not retried.
    #[error("{0}")]
    PrecedenceViolation(&'static str),

    /// Concurrent-write race on the same pair. The engine retries the
    /// read-decide-write cycle once before surfacing this.
    #[error("Concurrent write on link pair: person={person}, target={target}")]
    StorageConflict { person: Pid, target: Pid },

    #[error("Validation error: {0}")]
    Validation(String),
}
