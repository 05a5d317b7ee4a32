//! The storage collaborator contract.
//!
//! The transaction layer never touches data directly; it drives a
//! [`StorageBackend`] through begin/commit/rollback/savepoint primitives and
//! routes reads and writes through the connection of the current physical
//! transaction, or through autocommit when there is none.

use crate::storage::error::StorageResult;
use crate::storage::row::Row;
use crate::storage::types::{ConnectionId, RowKey, SavepointId, TableName};
use crate::transaction::IsolationLevel;

/// A single write against one table.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// Fails with `RowAlreadyExists` if the key is taken.
    Insert { table: TableName, row: Row },
    /// Replaces the columns of an existing row and bumps its version.
    Update { table: TableName, row: Row },
    /// Fails with `RowNotFound` if the key is absent.
    Delete { table: TableName, key: RowKey },
}

impl Mutation {
    pub fn table(&self) -> &TableName {
        match self {
            Mutation::Insert { table, .. }
            | Mutation::Update { table, .. }
            | Mutation::Delete { table, .. } => table,
        }
    }

    pub fn key(&self) -> &RowKey {
        match self {
            Mutation::Insert { row, .. } | Mutation::Update { row, .. } => &row.key,
            Mutation::Delete { key, .. } => key,
        }
    }
}

/// Physical transaction primitives plus connection-scoped data access.
///
/// `conn = None` on a data operation means autocommit: the statement is
/// applied and made visible immediately.
pub trait StorageBackend: Send + Sync {
    fn begin(&self, isolation: IsolationLevel, read_only: bool) -> StorageResult<ConnectionId>;

    fn commit(&self, conn: ConnectionId) -> StorageResult<()>;

    fn rollback(&self, conn: ConnectionId) -> StorageResult<()>;

    fn savepoint(&self, conn: ConnectionId) -> StorageResult<SavepointId>;

    fn rollback_to_savepoint(&self, conn: ConnectionId, savepoint: &SavepointId)
        -> StorageResult<()>;

    fn release_savepoint(&self, conn: ConnectionId, savepoint: &SavepointId) -> StorageResult<()>;

    fn read(
        &self,
        conn: Option<ConnectionId>,
        table: &TableName,
        key: &RowKey,
    ) -> StorageResult<Option<Row>>;

    fn scan(&self, conn: Option<ConnectionId>, table: &TableName) -> StorageResult<Vec<Row>>;

    fn apply(&self, conn: Option<ConnectionId>, mutation: Mutation) -> StorageResult<()>;
}
