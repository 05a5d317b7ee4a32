//! Transaction error types.

use std::fmt;

use thiserror::Error;

use crate::storage::{StorageError, StorageOp};
use crate::transaction::context::{ContextId, TxStatus};
use crate::transaction::isolation::IsolationLevel;
use crate::transaction::propagation::Propagation;

/// Result type for transaction operations.
pub type TransactionResult<T> = Result<T, TransactionError>;

/// Coarse classification of a [`TransactionError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The declared propagation cannot be honored in the current context.
    Configuration,
    /// The pool or the storage collaborator failed.
    Resource,
    /// A commit was refused because the transaction had to roll back.
    Rollback,
    /// Raised by a unit of work.
    Business,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::Resource => "resource",
            ErrorKind::Rollback => "rollback",
            ErrorKind::Business => "business",
        };
        f.write_str(name)
    }
}

/// Errors that can occur during transaction operations.
#[derive(Debug, Error)]
pub enum TransactionError {
    /// MANDATORY was requested but no transaction is open.
    #[error("no existing transaction found for propagation {0}")]
    NoExistingTransaction(Propagation),

    /// NEVER was requested inside an open transaction.
    #[error("existing transaction found for propagation {0}")]
    ExistingTransaction(Propagation),

    /// A participating unit asked for a different isolation than the open
    /// transaction has. Only raised when existing isolation is validated.
    #[error("participating unit requested {requested} but transaction {context} runs at {existing}")]
    IsolationMismatch {
        context: ContextId,
        requested: IsolationLevel,
        existing: IsolationLevel,
    },

    /// NESTED was requested inside a transaction but nesting is disabled.
    #[error("nested transactions are not allowed by the current configuration")]
    NestedNotAllowed,

    /// No pooled connection became free in time.
    #[error("connection pool exhausted: no connection free within {waited_ms}ms (pool size {pool_size})")]
    PoolExhausted { pool_size: usize, waited_ms: u64 },

    /// The storage collaborator failed a transaction primitive.
    #[error("storage {op} failed: {source}")]
    Resource {
        op: StorageOp,
        #[source]
        source: StorageError,
    },

    /// The transaction was marked rollback-only, so the commit became a rollback.
    #[error("transaction {context} was marked rollback-only and has been rolled back")]
    RollbackOnly { context: ContextId },

    /// Transaction was already committed or rolled back.
    #[error("transaction {context} is no longer active (state: {status})")]
    NotActive { context: ContextId, status: TxStatus },

    /// Failure raised by a unit of work.
    #[error("{0}")]
    Business(String),

    /// A data operation inside a unit of work failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Internal error.
    #[error("internal transaction error: {0}")]
    Internal(String),
}

impl TransactionError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransactionError::NoExistingTransaction(_)
            | TransactionError::ExistingTransaction(_)
            | TransactionError::IsolationMismatch { .. }
            | TransactionError::NestedNotAllowed => ErrorKind::Configuration,
            TransactionError::PoolExhausted { .. }
            | TransactionError::Resource { .. }
            | TransactionError::Internal(_) => ErrorKind::Resource,
            TransactionError::RollbackOnly { .. } | TransactionError::NotActive { .. } => {
                ErrorKind::Rollback
            }
            TransactionError::Business(_) | TransactionError::Storage(_) => ErrorKind::Business,
        }
    }

    /// Check if the caller may retry the whole unit of work.
    ///
    /// The transaction layer itself never retries.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransactionError::PoolExhausted { .. } => true,
            TransactionError::Resource { source, .. } | TransactionError::Storage(source) => {
                source.is_retriable()
            }
            _ => false,
        }
    }

    /// Create a business failure from a message.
    pub fn business(message: impl Into<String>) -> Self {
        Self::Business(message.into())
    }

    pub(crate) fn resource(op: StorageOp, source: StorageError) -> Self {
        Self::Resource { op, source }
    }
}
