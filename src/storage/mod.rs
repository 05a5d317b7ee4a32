//! storage layer for enrolldb
//!
//! this module defines the storage collaborator the transaction layer drives,
//! and an in-memory implementation of it. The upper layers (transaction
//! manager, university service) use this API and never touch table state
//! directly.
//!
//!  # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     StorageBackend                          │
//! │  (begin/commit/rollback, savepoints, read/scan/apply)       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      MemoryStore                            │
//! │  committed tables  +  per-connection write sets             │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!        ┌─────────────────────┴─────────────────────┐
//!        ▼                                           ▼
//!  ┌─────────────┐                             ┌─────────────┐
//!  │     row     │                             │    types    │
//!  │ (JSON rows) │                             │ (names/ids) │
//!  └─────────────┘                             └─────────────┘
//!  ```
//!
//! # Usage
//!
//! ```ignore
//! use enrolldb::storage::{MemoryStore, Mutation, Row, RowKey, StorageBackend, TableName};
//! use enrolldb::transaction::IsolationLevel;
//!
//! let store = MemoryStore::new();
//! let table = TableName::new("courses")?;
//!
//! // Write inside a connection
//! let conn = store.begin(IsolationLevel::ReadCommitted, false)?;
//! let row = Row::from_value(RowKey::generate(), json!({"title": "Databases", "capacity": 30}))?;
//! store.apply(Some(conn), Mutation::Insert { table: table.clone(), row })?;
//!
//! // Nothing is visible to others until commit
//! assert!(store.scan(None, &table)?.is_empty());
//! store.commit(conn)?;
//! ```

mod backend;
mod error;
mod memory;
mod row;
mod types;

// Re-export public API
pub use backend::{Mutation, StorageBackend};
pub use error::{StorageError, StorageOp, StorageResult};
pub use memory::{MemoryStore, StorageStats};
pub use row::{deserialize_row, serialize_row, Row};
pub use types::{ConnectionId, InvalidNameError, RowKey, SavepointId, TableName};
