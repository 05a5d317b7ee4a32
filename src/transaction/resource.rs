//! The resource held by one physical transaction.
//!
//! A [`ResourceHolder`] owns a pooled connection slot, the storage connection
//! begun on it, and the savepoints opened by nested units. It is dropped when
//! the physical transaction completes; dropping a holder that is still open
//! rolls the connection back, so the slot is released on every exit path.

use std::sync::Arc;

use log::{debug, warn};

use crate::storage::{ConnectionId, SavepointId, StorageBackend, StorageError, StorageOp};
use crate::transaction::context::{ContextId, TxStatus};
use crate::transaction::error::{TransactionError, TransactionResult};
use crate::transaction::isolation::IsolationLevel;
use crate::transaction::pool::PoolPermit;

pub struct ResourceHolder {
    owner: ContextId,
    connection: ConnectionId,
    backend: Arc<dyn StorageBackend>,
    savepoints: Vec<SavepointId>,
    status: TxStatus,
    _permit: PoolPermit,
}

impl ResourceHolder {
    /// Begin a physical transaction on a pooled slot.
    pub(crate) fn begin(
        owner: ContextId,
        backend: Arc<dyn StorageBackend>,
        permit: PoolPermit,
        isolation: IsolationLevel,
        read_only: bool,
    ) -> TransactionResult<Self> {
        let connection = backend
            .begin(isolation, read_only)
            .map_err(|e| TransactionError::resource(StorageOp::Begin, e))?;
        Ok(Self {
            owner,
            connection,
            backend,
            savepoints: Vec::new(),
            status: TxStatus::Active,
            _permit: permit,
        })
    }

    /// The context that created this holder.
    pub fn owner(&self) -> ContextId {
        self.owner
    }

    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    pub fn status(&self) -> TxStatus {
        self.status
    }

    pub fn is_open(&self) -> bool {
        self.status == TxStatus::Active
    }

    /// Number of savepoints currently open.
    pub fn savepoint_depth(&self) -> usize {
        self.savepoints.len()
    }

    fn ensure_open(&self) -> TransactionResult<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(TransactionError::NotActive {
                context: self.owner,
                status: self.status,
            })
        }
    }

    /// Commit the physical transaction.
    ///
    /// Committing an already committed holder is a no-op. A storage failure
    /// leaves the holder rolled back.
    pub fn commit(&mut self) -> TransactionResult<()> {
        match self.status {
            TxStatus::Committed => return Ok(()),
            TxStatus::Active => {}
            status => {
                return Err(TransactionError::NotActive {
                    context: self.owner,
                    status,
                })
            }
        }

        match self.backend.commit(self.connection) {
            Ok(()) => {
                self.status = TxStatus::Committed;
                self.savepoints.clear();
                debug!("Committed transaction {} on {}", self.owner, self.connection);
                Ok(())
            }
            Err(e) => {
                warn!(
                    "Commit of transaction {} failed, rolling back: {}",
                    self.owner, e
                );
                self.discard();
                Err(TransactionError::resource(StorageOp::Commit, e))
            }
        }
    }

    /// Roll back the physical transaction.
    ///
    /// Rolling back an already rolled back holder is a no-op. The holder ends
    /// up rolled back even if the storage call fails.
    pub fn rollback(&mut self) -> TransactionResult<()> {
        match self.status {
            TxStatus::RolledBack => return Ok(()),
            TxStatus::Active => {}
            status => {
                return Err(TransactionError::NotActive {
                    context: self.owner,
                    status,
                })
            }
        }

        self.status = TxStatus::RolledBack;
        self.savepoints.clear();
        self.backend
            .rollback(self.connection)
            .map_err(|e| TransactionError::resource(StorageOp::Rollback, e))?;
        debug!("Rolled back transaction {} on {}", self.owner, self.connection);
        Ok(())
    }

    /// Open a savepoint for a nested unit.
    pub fn create_savepoint(&mut self) -> TransactionResult<SavepointId> {
        self.ensure_open()?;
        let savepoint = self
            .backend
            .savepoint(self.connection)
            .map_err(|e| TransactionError::resource(StorageOp::Savepoint, e))?;
        self.savepoints.push(savepoint.clone());
        Ok(savepoint)
    }

    /// Undo everything since `savepoint`, which must be the innermost one.
    ///
    /// The savepoint stays open if the storage call fails.
    pub fn rollback_to_savepoint(&mut self, savepoint: &SavepointId) -> TransactionResult<()> {
        self.check_innermost(savepoint, StorageOp::RollbackToSavepoint)?;
        self.backend
            .rollback_to_savepoint(self.connection, savepoint)
            .map_err(|e| TransactionError::resource(StorageOp::RollbackToSavepoint, e))?;
        self.savepoints.pop();
        Ok(())
    }

    /// Keep the work since `savepoint` as part of the enclosing transaction.
    pub fn release_savepoint(&mut self, savepoint: &SavepointId) -> TransactionResult<()> {
        self.check_innermost(savepoint, StorageOp::ReleaseSavepoint)?;
        self.backend
            .release_savepoint(self.connection, savepoint)
            .map_err(|e| TransactionError::resource(StorageOp::ReleaseSavepoint, e))?;
        self.savepoints.pop();
        Ok(())
    }

    fn check_innermost(&self, savepoint: &SavepointId, op: StorageOp) -> TransactionResult<()> {
        self.ensure_open()?;
        if self.savepoints.last() != Some(savepoint) {
            return Err(TransactionError::resource(
                op,
                StorageError::UnknownSavepoint {
                    connection: self.connection,
                    savepoint: savepoint.clone(),
                },
            ));
        }
        Ok(())
    }

    /// Best-effort rollback after a failed commit.
    fn discard(&mut self) {
        self.status = TxStatus::RolledBack;
        self.savepoints.clear();
        if let Err(e) = self.backend.rollback(self.connection) {
            debug!("Discarding {} after failed commit: {}", self.connection, e);
        }
    }
}

impl Drop for ResourceHolder {
    fn drop(&mut self) {
        if self.is_open() {
            debug!(
                "Transaction {} dropped while open, rolling back {}",
                self.owner, self.connection
            );
            self.status = TxStatus::RolledBack;
            if let Err(e) = self.backend.rollback(self.connection) {
                warn!("Rollback of abandoned {} failed: {}", self.connection, e);
            }
        }
    }
}

impl std::fmt::Debug for ResourceHolder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceHolder")
            .field("owner", &self.owner)
            .field("connection", &self.connection)
            .field("status", &self.status)
            .field("savepoints", &self.savepoints)
            .finish()
    }
}
