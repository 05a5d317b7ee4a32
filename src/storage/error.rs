//! Storage layer error types
//!
//! All errors that can occur during storage operations are defined here.

use thiserror::Error;

use crate::storage::types::{ConnectionId, InvalidNameError, RowKey, SavepointId, TableName};

/// The storage primitive an error (or an injected fault) is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageOp {
    Begin,
    Commit,
    Rollback,
    Savepoint,
    RollbackToSavepoint,
    ReleaseSavepoint,
    Read,
    Write,
}

impl std::fmt::Display for StorageOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StorageOp::Begin => "begin",
            StorageOp::Commit => "commit",
            StorageOp::Rollback => "rollback",
            StorageOp::Savepoint => "savepoint",
            StorageOp::RollbackToSavepoint => "rollback to savepoint",
            StorageOp::ReleaseSavepoint => "release savepoint",
            StorageOp::Read => "read",
            StorageOp::Write => "write",
        };
        f.write_str(name)
    }
}

/// the main error type for storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    /// the connection is unknown or was already closed
    #[error("unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    /// the savepoint was never created on this connection or is already gone
    #[error("unknown savepoint {savepoint} on {connection}")]
    UnknownSavepoint {
        connection: ConnectionId,
        savepoint: SavepointId,
    },

    /// the requested row was not found
    #[error("row not found: table={table}, key={key}")]
    RowNotFound { table: TableName, key: RowKey },

    /// the row already exists (duplicate primary key)
    #[error("row already exists: table={table}, key={key}")]
    RowAlreadyExists { table: TableName, key: RowKey },

    /// another transaction committed a write to the same row first
    #[error("serialization failure on {table}/{key}: row changed since transaction start")]
    SerializationFailure { table: TableName, key: RowKey },

    /// invalid table or row name
    #[error("invalid name: {0}")]
    InvalidName(#[from] InvalidNameError),

    /// JSON serialization or deserialization failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error while exporting data
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// the row data doesn't match the expected shape
    #[error("schema violation: {0}")]
    SchemaViolation(String),

    /// a fault armed through `MemoryStore::fail_next`
    #[error("injected {0} failure")]
    InjectedFault(StorageOp),
}

impl StorageError {
    /// check if this error indicates the resource doesn't exist
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StorageError::RowNotFound { .. }
                | StorageError::UnknownConnection(_)
                | StorageError::UnknownSavepoint { .. }
        )
    }

    /// check if this error is a conflict
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            StorageError::RowAlreadyExists { .. } | StorageError::SerializationFailure { .. }
        )
    }

    /// check if this error is recoverable by retrying the whole transaction
    pub fn is_retriable(&self) -> bool {
        matches!(self, StorageError::SerializationFailure { .. })
    }
}

/// result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;
