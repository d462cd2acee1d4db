use thiserror::Error;

/// Errors that can occur in the storage layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// SQLite rejected the operation, including foreign-key violations.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The blocking task running a store operation panicked or was cancelled.
    #[error("store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// A previous holder of the connection panicked.
    #[error("database connection lock poisoned")]
    Lock,

    /// A stored value could not be mapped back into a record.
    #[error("invalid data: {0}")]
    InvalidData(String),
}
