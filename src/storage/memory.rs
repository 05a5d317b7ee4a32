//! In-memory storage backend.
//!
//! Committed state is a map of tables. Every open connection keeps its own
//! write set on top of it:
//! - READ COMMITTED connections read through to the latest committed state
//! - REPEATABLE READ and SERIALIZABLE connections read from a snapshot taken
//!   at begin, and fail at commit if another connection committed a write to
//!   one of the same rows after that (first committer wins)
//!
//! Savepoints are copies of the write set. Autocommit writes go straight to
//! the committed state.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use log::{debug, trace};
use parking_lot::Mutex;
use serde_json::Value;

use crate::storage::backend::{Mutation, StorageBackend};
use crate::storage::error::{StorageError, StorageOp, StorageResult};
use crate::storage::row::{serialize_row, Row};
use crate::storage::types::{ConnectionId, RowKey, SavepointId, TableName};
use crate::transaction::IsolationLevel;

type Tables = BTreeMap<TableName, BTreeMap<RowKey, Row>>;
type WriteSet = BTreeMap<(TableName, RowKey), Option<Row>>;

/// Counters for every call made against the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageStats {
    pub begins: u64,
    pub commits: u64,
    pub rollbacks: u64,
    pub savepoints: u64,
    pub savepoint_rollbacks: u64,
    pub savepoint_releases: u64,
    pub reads: u64,
    pub writes: u64,
}

impl StorageStats {
    /// Number of transaction-control calls (begin, commit, rollback and the
    /// three savepoint primitives).
    pub fn control_calls(&self) -> u64 {
        self.begins
            + self.commits
            + self.rollbacks
            + self.savepoints
            + self.savepoint_rollbacks
            + self.savepoint_releases
    }

    /// Every call, data access included.
    pub fn total_calls(&self) -> u64 {
        self.control_calls() + self.reads + self.writes
    }
}

struct ConnectionState {
    isolation: IsolationLevel,
    read_only: bool,
    start_seq: u64,
    snapshot: Option<Tables>,
    writes: WriteSet,
    savepoints: Vec<(SavepointId, WriteSet)>,
    savepoint_counter: u32,
}

#[derive(Default)]
struct StoreInner {
    tables: Tables,
    /// commit sequence that last wrote each row, deletions included
    last_write: HashMap<(TableName, RowKey), u64>,
    commit_seq: u64,
    connections: HashMap<ConnectionId, ConnectionState>,
    faults: HashSet<StorageOp>,
    stats: StorageStats,
}

impl StoreInner {
    fn check_fault(&mut self, op: StorageOp) -> StorageResult<()> {
        if self.faults.remove(&op) {
            debug!("Injected {} failure fired", op);
            return Err(StorageError::InjectedFault(op));
        }
        Ok(())
    }

    fn connection(&mut self, conn: ConnectionId) -> StorageResult<&mut ConnectionState> {
        self.connections
            .get_mut(&conn)
            .ok_or(StorageError::UnknownConnection(conn))
    }

    fn visible(&self, conn: Option<ConnectionId>, table: &TableName, key: &RowKey) -> Option<Row> {
        let state = conn.and_then(|c| self.connections.get(&c));
        if let Some(state) = state {
            if let Some(entry) = state.writes.get(&(table.clone(), key.clone())) {
                return entry.clone();
            }
            let base = state.snapshot.as_ref().unwrap_or(&self.tables);
            return base.get(table).and_then(|rows| rows.get(key)).cloned();
        }
        self.tables.get(table).and_then(|rows| rows.get(key)).cloned()
    }

    fn write_committed(&mut self, table: TableName, key: RowKey, value: Option<Row>) {
        self.last_write
            .insert((table.clone(), key.clone()), self.commit_seq);
        let rows = self.tables.entry(table).or_default();
        match value {
            Some(row) => {
                rows.insert(key, row);
            }
            None => {
                rows.remove(&key);
            }
        }
    }
}

/// A thread-safe in-memory [`StorageBackend`].
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<StoreInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a one-shot failure: the next call of `op` returns
    /// [`StorageError::InjectedFault`] without side effects.
    pub fn fail_next(&self, op: StorageOp) {
        self.inner.lock().faults.insert(op);
    }

    /// Snapshot of the call counters.
    pub fn stats(&self) -> StorageStats {
        self.inner.lock().stats
    }

    /// Number of connections begun and not yet committed or rolled back.
    pub fn open_connections(&self) -> usize {
        self.inner.lock().connections.len()
    }

    /// Number of committed rows in `table`.
    pub fn row_count(&self, table: &TableName) -> usize {
        self.inner
            .lock()
            .tables
            .get(table)
            .map(|rows| rows.len())
            .unwrap_or(0)
    }

    /// Write the committed state as pretty JSON: `{ "table": [row, ...] }`.
    pub fn export_json(&self, path: impl AsRef<Path>) -> StorageResult<()> {
        let mut out = serde_json::Map::new();
        {
            let inner = self.inner.lock();
            for (table, rows) in &inner.tables {
                let rows = rows
                    .values()
                    .map(serialize_row)
                    .collect::<StorageResult<Vec<_>>>()?;
                out.insert(table.to_string(), Value::Array(rows));
            }
        }
        let bytes = serde_json::to_vec_pretty(&Value::Object(out))?;
        std::fs::write(path, bytes)?;
        Ok(())
    }
}

impl StorageBackend for MemoryStore {
    fn begin(&self, isolation: IsolationLevel, read_only: bool) -> StorageResult<ConnectionId> {
        let mut inner = self.inner.lock();
        inner.stats.begins += 1;
        inner.check_fault(StorageOp::Begin)?;

        let conn = ConnectionId::next();
        let snapshot = isolation.reads_snapshot().then(|| inner.tables.clone());
        let state = ConnectionState {
            isolation,
            read_only,
            start_seq: inner.commit_seq,
            snapshot,
            writes: WriteSet::new(),
            savepoints: Vec::new(),
            savepoint_counter: 0,
        };
        inner.connections.insert(conn, state);
        debug!(
            "Began {} ({}, read_only={})",
            conn, isolation, read_only
        );
        Ok(conn)
    }

    fn commit(&self, conn: ConnectionId) -> StorageResult<()> {
        let mut inner = self.inner.lock();
        inner.stats.commits += 1;
        inner.check_fault(StorageOp::Commit)?;

        let state = inner.connection(conn)?;
        if state.isolation.checks_write_conflicts() {
            let start_seq = state.start_seq;
            let keys: Vec<_> = state.writes.keys().cloned().collect();
            for (table, key) in keys {
                let changed_since = inner
                    .last_write
                    .get(&(table.clone(), key.clone()))
                    .is_some_and(|seq| *seq > start_seq);
                if changed_since {
                    return Err(StorageError::SerializationFailure { table, key });
                }
            }
        }

        let Some(state) = inner.connections.remove(&conn) else {
            return Err(StorageError::UnknownConnection(conn));
        };
        if state.writes.is_empty() {
            debug!("Committed {} (no writes)", conn);
            return Ok(());
        }
        inner.commit_seq += 1;
        let count = state.writes.len();
        for ((table, key), value) in state.writes {
            inner.write_committed(table, key, value);
        }
        debug!("Committed {} ({} writes)", conn, count);
        Ok(())
    }

    fn rollback(&self, conn: ConnectionId) -> StorageResult<()> {
        let mut inner = self.inner.lock();
        inner.stats.rollbacks += 1;
        inner.check_fault(StorageOp::Rollback)?;

        match inner.connections.remove(&conn) {
            Some(state) => {
                debug!("Rolled back {} ({} writes discarded)", conn, state.writes.len());
                Ok(())
            }
            None => Err(StorageError::UnknownConnection(conn)),
        }
    }

    fn savepoint(&self, conn: ConnectionId) -> StorageResult<SavepointId> {
        let mut inner = self.inner.lock();
        inner.stats.savepoints += 1;
        inner.check_fault(StorageOp::Savepoint)?;

        let state = inner.connection(conn)?;
        state.savepoint_counter += 1;
        let id = SavepointId::numbered(state.savepoint_counter);
        state.savepoints.push((id.clone(), state.writes.clone()));
        debug!("Created savepoint {} on {}", id, conn);
        Ok(id)
    }

    fn rollback_to_savepoint(
        &self,
        conn: ConnectionId,
        savepoint: &SavepointId,
    ) -> StorageResult<()> {
        let mut inner = self.inner.lock();
        inner.stats.savepoint_rollbacks += 1;
        inner.check_fault(StorageOp::RollbackToSavepoint)?;

        let state = inner.connection(conn)?;
        let Some(pos) = state.savepoints.iter().position(|(id, _)| id == savepoint) else {
            return Err(StorageError::UnknownSavepoint {
                connection: conn,
                savepoint: savepoint.clone(),
            });
        };
        // Later savepoints are destroyed; the target itself is consumed too
        // because the nested unit that created it is finished.
        state.savepoints.truncate(pos + 1);
        if let Some((_, writes)) = state.savepoints.pop() {
            state.writes = writes;
        }
        debug!("Rolled back {} to savepoint {}", conn, savepoint);
        Ok(())
    }

    fn release_savepoint(&self, conn: ConnectionId, savepoint: &SavepointId) -> StorageResult<()> {
        let mut inner = self.inner.lock();
        inner.stats.savepoint_releases += 1;
        inner.check_fault(StorageOp::ReleaseSavepoint)?;

        let state = inner.connection(conn)?;
        let Some(pos) = state.savepoints.iter().position(|(id, _)| id == savepoint) else {
            return Err(StorageError::UnknownSavepoint {
                connection: conn,
                savepoint: savepoint.clone(),
            });
        };
        state.savepoints.truncate(pos);
        debug!("Released savepoint {} on {}", savepoint, conn);
        Ok(())
    }

    fn read(
        &self,
        conn: Option<ConnectionId>,
        table: &TableName,
        key: &RowKey,
    ) -> StorageResult<Option<Row>> {
        let mut inner = self.inner.lock();
        inner.stats.reads += 1;
        inner.check_fault(StorageOp::Read)?;
        if let Some(c) = conn {
            inner.connection(c)?;
        }
        trace!("read {}/{} via {:?}", table, key, conn);
        Ok(inner.visible(conn, table, key))
    }

    fn scan(&self, conn: Option<ConnectionId>, table: &TableName) -> StorageResult<Vec<Row>> {
        let mut inner = self.inner.lock();
        inner.stats.reads += 1;
        inner.check_fault(StorageOp::Read)?;

        let inner: &StoreInner = &inner;
        let Some(conn) = conn else {
            return Ok(inner
                .tables
                .get(table)
                .map(|rows| rows.values().cloned().collect())
                .unwrap_or_default());
        };
        let state = inner
            .connections
            .get(&conn)
            .ok_or(StorageError::UnknownConnection(conn))?;

        let base = state.snapshot.as_ref().unwrap_or(&inner.tables);
        let mut rows: BTreeMap<RowKey, Row> = base.get(table).cloned().unwrap_or_default();
        for ((t, key), value) in &state.writes {
            if t != table {
                continue;
            }
            match value {
                Some(row) => {
                    rows.insert(key.clone(), row.clone());
                }
                None => {
                    rows.remove(key);
                }
            }
        }
        Ok(rows.into_values().collect())
    }

    fn apply(&self, conn: Option<ConnectionId>, mutation: Mutation) -> StorageResult<()> {
        let mut inner = self.inner.lock();
        inner.stats.writes += 1;
        inner.check_fault(StorageOp::Write)?;
        if let Some(c) = conn {
            let state = inner.connection(c)?;
            if state.read_only {
                trace!("write on read-only {} (hint only)", c);
            }
        }

        let table = mutation.table().clone();
        let key = mutation.key().clone();
        let current = inner.visible(conn, &table, &key);
        let value = match (mutation, current) {
            (Mutation::Insert { row, .. }, None) => Some(row),
            (Mutation::Insert { .. }, Some(_)) => {
                return Err(StorageError::RowAlreadyExists { table, key });
            }
            (Mutation::Update { row, .. }, Some(existing)) => Some(existing.with_update(row.data)),
            (Mutation::Delete { .. }, Some(_)) => None,
            (Mutation::Update { .. } | Mutation::Delete { .. }, None) => {
                return Err(StorageError::RowNotFound { table, key });
            }
        };

        trace!("write {}/{} via {:?}", table, key, conn);
        match conn {
            Some(c) => {
                inner.connection(c)?.writes.insert((table, key), value);
            }
            None => {
                inner.commit_seq += 1;
                inner.write_committed(table, key, value);
            }
        }
        Ok(())
    }
}
