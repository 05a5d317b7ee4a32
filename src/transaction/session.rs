//! A call path and its context stack.
//!
//! A [`Session`] is the explicit form of "the current transaction": it is
//! handed to every unit of work as `&mut Session`, and nested calls to
//! [`Session::run`] push onto its stack. Two sessions never see each other's
//! stacks, even when they share a [`TransactionManager`].
//!
//! # Completion
//!
//! | Unit     | Body `Ok`, not rollback-only | Body `Ok`, rollback-only            | Body `Err`                |
//! |----------|------------------------------|-------------------------------------|---------------------------|
//! | physical | commit                       | roll back, `RollbackOnly`           | roll back, original error |
//! | nested   | release savepoint            | roll back to savepoint, mark parent | roll back to savepoint    |
//! | joined   | nothing                      | nothing                             | mark target rollback-only |
//! | none     | nothing                      | nothing                             | nothing                   |
//!
//! A panicking body is completed as a failed unit before the panic leaves
//! [`Session::run`]. Dropping a session rolls back whatever is still open,
//! innermost first.

use std::panic::{self, AssertUnwindSafe};

use log::{debug, trace, warn};

use crate::storage::{ConnectionId, Mutation, Row, RowKey, StorageResult, TableName};
use crate::transaction::context::{ContextId, ContextKind, TransactionContext};
use crate::transaction::definition::TransactionDefinition;
use crate::transaction::error::{TransactionError, TransactionResult};
use crate::transaction::manager::TransactionManager;
use crate::transaction::propagation::{resolve, Action, IsolationConflict};
use crate::transaction::stack::{ContextStack, Frame, OwnedFrame, SuspendedStack};

pub struct Session {
    manager: TransactionManager,
    stack: ContextStack,
    warnings: Vec<IsolationConflict>,
}

impl Session {
    pub(crate) fn new(manager: TransactionManager) -> Self {
        Self {
            manager,
            stack: ContextStack::new(),
            warnings: Vec::new(),
        }
    }

    pub fn manager(&self) -> &TransactionManager {
        &self.manager
    }

    /// Run `body` as a unit of work under `definition`.
    ///
    /// Any `Err` returned by `body` marks the unit rollback-only and is
    /// returned unchanged once the rollback is done. Errors raised by the
    /// transaction layer itself reach the caller through `E::from`.
    ///
    /// A panic in `body` rolls this unit back before it propagates, so a
    /// caller that catches it gets the session back as it was before `run`.
    pub fn run<T, E, F>(&mut self, definition: &TransactionDefinition, body: F) -> Result<T, E>
    where
        E: From<TransactionError>,
        F: FnOnce(&mut Session) -> Result<T, E>,
    {
        let frame = self.enter(definition).map_err(E::from)?;
        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| body(&mut *self))) {
            Ok(outcome) => outcome,
            Err(payload) => {
                warn!("Unit {} panicked, rolling back", frame);
                if let Err(e) = self.complete(frame, false) {
                    warn!("Rollback of panicked unit {} failed: {}", frame, e);
                }
                panic::resume_unwind(payload);
            }
        };
        let completion = self.complete(frame, outcome.is_ok());

        match (outcome, completion) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(E::from(e)),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(cleanup)) => {
                warn!("Cleanup after failed unit also failed: {}", cleanup);
                Err(e)
            }
        }
    }

    fn enter(&mut self, definition: &TransactionDefinition) -> TransactionResult<ContextId> {
        let ambient = self.stack.peek();
        let ambient_id = ambient.map(TransactionContext::id);
        let resolution = resolve(definition, ambient, self.manager.config())?;

        if let Some(conflict) = resolution.conflict {
            warn!("Isolation conflict: {}", conflict);
            self.warnings.push(conflict);
        }

        let name = definition.name.clone();
        let read_only = definition.read_only;

        match resolution.action {
            Action::Join => {
                let target = ambient_id.ok_or_else(|| {
                    TransactionError::Internal("join without an ambient transaction".into())
                })?;
                let id = ContextId::new();
                debug!(
                    "{} joining transaction {}",
                    name.as_deref().unwrap_or("unit"),
                    target
                );
                self.stack.push(Frame::Joined { id, target });
                Ok(id)
            }
            Action::StartPhysical { suspend_ambient } => {
                let suspended = self.suspend_if(suspend_ambient);
                let parent = self.stack.peek().map(TransactionContext::id);
                let context = TransactionContext::new(
                    ContextKind::Physical,
                    resolution.isolation,
                    read_only,
                    parent,
                    name,
                );
                let holder = match self.manager.begin_physical(&context) {
                    Ok(holder) => holder,
                    Err(e) => {
                        if let Some(token) = suspended {
                            self.stack.resume(token);
                        }
                        return Err(e);
                    }
                };
                let id = context.id();
                self.stack.push(Frame::Owned(OwnedFrame {
                    context,
                    holder: Some(holder),
                    savepoint: None,
                    suspended,
                }));
                Ok(id)
            }
            Action::StartNested => {
                let holder = self.stack.nearest_holder_mut().ok_or_else(|| {
                    TransactionError::Internal("nested unit without a physical ancestor".into())
                })?;
                let savepoint = holder.create_savepoint()?;
                let context = TransactionContext::new(
                    ContextKind::Nested,
                    resolution.isolation,
                    read_only,
                    ambient_id,
                    name,
                );
                debug!(
                    "Began nested transaction {} at savepoint {}",
                    context.label(),
                    savepoint
                );
                let id = context.id();
                self.stack.push(Frame::Owned(OwnedFrame {
                    context,
                    holder: None,
                    savepoint: Some(savepoint),
                    suspended: None,
                }));
                Ok(id)
            }
            Action::RunWithout { suspend_ambient } => {
                let suspended = self.suspend_if(suspend_ambient);
                let parent = self.stack.peek().map(TransactionContext::id);
                let context = TransactionContext::new(
                    ContextKind::None,
                    resolution.isolation,
                    read_only,
                    parent,
                    name,
                );
                trace!("Running {} without a transaction", context.label());
                let id = context.id();
                self.stack.push(Frame::Owned(OwnedFrame {
                    context,
                    holder: None,
                    savepoint: None,
                    suspended,
                }));
                Ok(id)
            }
        }
    }

    fn suspend_if(&mut self, suspend: bool) -> Option<SuspendedStack> {
        if !suspend || self.stack.is_empty() {
            return None;
        }
        let token = self.stack.suspend();
        debug!("Suspended {} frame(s)", token.len());
        Some(token)
    }

    fn complete(&mut self, frame_id: ContextId, succeeded: bool) -> TransactionResult<()> {
        // Frames left above ours by a unit that never returned (a caught
        // panic) are abandoned first.
        while let Some(top) = self.stack.top_id() {
            if top == frame_id {
                break;
            }
            if let Some(frame) = self.stack.pop() {
                warn!("Abandoning unfinished unit {}", frame.id());
                self.abandon(frame);
            }
        }
        let frame = self.stack.pop().ok_or_else(|| {
            TransactionError::Internal(format!("unit {} missing from the context stack", frame_id))
        })?;

        match frame {
            Frame::Joined { target, .. } => {
                if !succeeded {
                    if let Some(context) = self.stack.context_mut(target) {
                        context.mark_rollback_only();
                        debug!("Participant failed, transaction {} is rollback-only", target);
                    }
                }
                Ok(())
            }
            Frame::Owned(mut owned) => {
                if !succeeded {
                    owned.context.mark_rollback_only();
                }
                let result = match owned.context.kind() {
                    ContextKind::Physical => self.complete_physical(&mut owned, succeeded),
                    ContextKind::Nested => self.complete_nested(&mut owned, succeeded),
                    ContextKind::None => Ok(()),
                };
                if let Some(token) = owned.suspended.take() {
                    debug!("Resuming {} frame(s)", token.len());
                    self.stack.resume(token);
                }
                result
            }
        }
    }

    fn complete_physical(&mut self, owned: &mut OwnedFrame, succeeded: bool) -> TransactionResult<()> {
        let id = owned.context.id();
        let Some(mut holder) = owned.holder.take() else {
            return Err(TransactionError::Internal(format!(
                "physical transaction {} has no connection",
                id
            )));
        };

        let result = if owned.context.is_rollback_only() {
            let rolled_back = holder.rollback();
            owned.context.set_rolled_back();
            match rolled_back {
                Err(e) => Err(e),
                Ok(()) if succeeded => {
                    warn!("Transaction {} was marked rollback-only", owned.context.label());
                    Err(TransactionError::RollbackOnly { context: id })
                }
                Ok(()) => Ok(()),
            }
        } else {
            match holder.commit() {
                Ok(()) => {
                    owned.context.set_committed();
                    Ok(())
                }
                Err(e) => {
                    owned.context.set_rolled_back();
                    Err(e)
                }
            }
        };

        self.manager.mark_completed(id);
        drop(holder);
        result
    }

    fn complete_nested(&mut self, owned: &mut OwnedFrame, succeeded: bool) -> TransactionResult<()> {
        let id = owned.context.id();
        let Some(savepoint) = owned.savepoint.take() else {
            return Err(TransactionError::Internal(format!(
                "nested transaction {} has no savepoint",
                id
            )));
        };
        let Some(holder) = self.stack.nearest_holder_mut() else {
            return Err(TransactionError::Internal(format!(
                "nested transaction {} lost its physical ancestor",
                id
            )));
        };

        let physical = holder.owner();
        let releasing = !owned.context.is_rollback_only();
        let result = if releasing {
            holder.release_savepoint(&savepoint)
        } else {
            holder.rollback_to_savepoint(&savepoint)
        };

        // The savepoint's writes are still part of the physical transaction,
        // so it must not commit.
        if let Err(e) = result {
            owned.context.set_rolled_back();
            if let Some(context) = self.stack.context_mut(physical) {
                context.mark_rollback_only();
            }
            warn!(
                "Savepoint {} of {} failed, transaction {} is rollback-only: {}",
                savepoint,
                owned.context.label(),
                physical,
                e
            );
            return Err(e);
        }

        if releasing {
            owned.context.set_committed();
            debug!("Released savepoint {} of {}", savepoint, owned.context.label());
            return Ok(());
        }
        owned.context.set_rolled_back();
        debug!("Rolled back {} to savepoint {}", owned.context.label(), savepoint);

        if succeeded {
            if let Some(parent) = owned.context.parent() {
                if let Some(context) = self.stack.context_mut(parent) {
                    context.mark_rollback_only();
                }
            }
            return Err(TransactionError::RollbackOnly { context: id });
        }
        Ok(())
    }

    /// Roll back a frame whose unit will never complete normally.
    fn abandon(&mut self, frame: Frame) {
        match frame {
            Frame::Joined { target, .. } => {
                if let Some(context) = self.stack.context_mut(target) {
                    context.mark_rollback_only();
                }
            }
            Frame::Owned(mut owned) => {
                owned.context.mark_rollback_only();
                let result = match owned.context.kind() {
                    ContextKind::Physical => self.complete_physical(&mut owned, false),
                    ContextKind::Nested => self.complete_nested(&mut owned, false),
                    ContextKind::None => Ok(()),
                };
                if let Err(e) = result {
                    warn!("Rollback of {} failed: {}", owned.context.label(), e);
                }
                if let Some(token) = owned.suspended.take() {
                    self.stack.resume(token);
                }
            }
        }
    }

    /// Roll back everything still open and empty the stack.
    ///
    /// Returns the number of frames unwound.
    fn unwind(&mut self) -> usize {
        let mut unwound = 0;
        while let Some(frame) = self.stack.pop() {
            self.abandon(frame);
            unwound += 1;
        }
        unwound
    }

    /// Abandon the call path, rolling back every open unit.
    pub fn abort(mut self) -> usize {
        let unwound = self.unwind();
        if unwound > 0 {
            debug!("Aborted session, {} unit(s) rolled back", unwound);
        }
        unwound
    }

    /// The context the current unit runs in.
    pub fn current(&self) -> Option<&TransactionContext> {
        self.stack.peek()
    }

    pub fn depth(&self) -> usize {
        self.stack.depth()
    }

    pub fn stack(&self) -> &ContextStack {
        &self.stack
    }

    /// True when the current unit runs inside a physical transaction.
    pub fn is_transaction_active(&self) -> bool {
        self.stack.nearest_holder().is_some()
    }

    /// Connection of the current physical transaction, if any.
    pub fn current_connection(&self) -> Option<ConnectionId> {
        self.stack.nearest_holder().map(|holder| holder.connection())
    }

    /// Open savepoints on the current physical transaction.
    pub fn savepoint_depth(&self) -> usize {
        self.stack
            .nearest_holder()
            .map_or(0, |holder| holder.savepoint_depth())
    }

    /// Mark the current transaction rollback-only without failing the unit.
    pub fn set_rollback_only(&mut self) -> TransactionResult<()> {
        let Some(id) = self
            .stack
            .peek()
            .filter(|c| c.is_transactional())
            .map(TransactionContext::id)
        else {
            return Err(TransactionError::Internal(
                "no transaction to mark rollback-only".into(),
            ));
        };
        if let Some(context) = self.stack.context_mut(id) {
            context.mark_rollback_only();
        }
        Ok(())
    }

    /// Isolation conflicts seen while joining, oldest first.
    pub fn warnings(&self) -> &[IsolationConflict] {
        &self.warnings
    }

    pub fn read(&self, table: &TableName, key: &RowKey) -> StorageResult<Option<Row>> {
        self.manager
            .backend()
            .read(self.current_connection(), table, key)
    }

    pub fn scan(&self, table: &TableName) -> StorageResult<Vec<Row>> {
        self.manager.backend().scan(self.current_connection(), table)
    }

    pub fn insert(&self, table: &TableName, row: Row) -> StorageResult<()> {
        self.apply(Mutation::Insert {
            table: table.clone(),
            row,
        })
    }

    pub fn update(&self, table: &TableName, row: Row) -> StorageResult<()> {
        self.apply(Mutation::Update {
            table: table.clone(),
            row,
        })
    }

    pub fn delete(&self, table: &TableName, key: &RowKey) -> StorageResult<()> {
        self.apply(Mutation::Delete {
            table: table.clone(),
            key: key.clone(),
        })
    }

    fn apply(&self, mutation: Mutation) -> StorageResult<()> {
        let conn = self.current_connection();
        if conn.is_none() {
            trace!("autocommit write to {}", mutation.table());
        }
        self.manager.backend().apply(conn, mutation)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let unwound = self.unwind();
        if unwound > 0 {
            debug!("Session dropped with {} open unit(s), rolled back", unwound);
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("depth", &self.stack.depth())
            .field("connection", &self.current_connection())
            .field("warnings", &self.warnings.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{catch_unwind, AssertUnwindSafe};
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;

    use crate::storage::{MemoryStore, StorageBackend, StorageOp, StorageStats};
    use crate::transaction::config::TransactionConfig;
    use crate::transaction::context::TxStatus;
    use crate::transaction::error::ErrorKind;
    use crate::transaction::isolation::IsolationLevel;
    use crate::transaction::propagation::Propagation;

    const ALL: [Propagation; 7] = [
        Propagation::Required,
        Propagation::RequiresNew,
        Propagation::Nested,
        Propagation::Mandatory,
        Propagation::Supports,
        Propagation::NotSupported,
        Propagation::Never,
    ];

    fn setup() -> (Arc<MemoryStore>, TransactionManager) {
        setup_with(TransactionConfig::new())
    }

    fn setup_with(config: TransactionConfig) -> (Arc<MemoryStore>, TransactionManager) {
        let store = Arc::new(MemoryStore::new());
        let manager = TransactionManager::with_config(store.clone(), config);
        (store, manager)
    }

    fn items() -> TableName {
        TableName::new("items").unwrap()
    }

    fn item(key: &str) -> Row {
        Row::from_value(RowKey::new(key).unwrap(), json!({ "value": key })).unwrap()
    }

    fn key(key: &str) -> RowKey {
        RowKey::new(key).unwrap()
    }

    fn committed(store: &MemoryStore, k: &str) -> bool {
        store.read(None, &items(), &key(k)).unwrap().is_some()
    }

    type Res<T> = TransactionResult<T>;

    fn fail<T>() -> Res<T> {
        Err(TransactionError::business("boom"))
    }

    #[test]
    fn test_depth_restored_for_every_propagation() {
        for outer in [None, Some(Propagation::Required)] {
            for propagation in ALL {
                for succeed in [true, false] {
                    let (_store, manager) = setup();
                    let mut session = manager.session();
                    let body = |s: &mut Session| -> Res<()> {
                        let before = s.depth();
                        let _ = s.run(&TransactionDefinition::new(propagation), |_| {
                            if succeed {
                                Ok(())
                            } else {
                                fail()
                            }
                        });
                        assert_eq!(s.depth(), before, "{} succeed={}", propagation, succeed);
                        Ok(())
                    };
                    match outer {
                        Some(p) => {
                            let _ = session.run(&TransactionDefinition::new(p), body);
                        }
                        None => body(&mut session).unwrap(),
                    }
                    assert_eq!(session.depth(), 0);
                    assert_eq!(manager.pool().in_use(), 0);
                    assert_eq!(manager.active_count(), 0);
                }
            }
        }
    }

    #[test]
    fn test_required_starts_physical_then_joins() {
        let (store, manager) = setup();
        let mut session = manager.session();
        let result: Res<()> = session.run(&TransactionDefinition::required(), |s| {
            let outer = s.current().unwrap().clone();
            assert_eq!(outer.kind(), ContextKind::Physical);
            let conn = s.current_connection();
            assert!(conn.is_some());

            s.run(&TransactionDefinition::required(), |s| {
                assert_eq!(s.current().unwrap().id(), outer.id());
                assert_eq!(s.current_connection(), conn);
                assert_eq!(s.depth(), 2);
                Ok(())
            })
        });
        result.unwrap();
        assert_eq!(store.stats().begins, 1);
        assert_eq!(store.stats().commits, 1);
    }

    #[test]
    fn test_mandatory_without_transaction_touches_no_storage() {
        let (store, manager) = setup();
        let mut session = manager.session();
        let mut ran = false;
        let result: Res<()> = session.run(&TransactionDefinition::mandatory(), |_| {
            ran = true;
            Ok(())
        });
        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(!err.is_retryable());
        assert!(!ran);
        assert_eq!(store.stats().total_calls(), 0);
        assert_eq!(store.stats(), StorageStats::default());
    }

    #[test]
    fn test_never_inside_transaction_leaves_it_untouched() {
        let (store, manager) = setup();
        let mut session = manager.session();
        let result: Res<()> = session.run(&TransactionDefinition::required(), |s| {
            let err = s
                .run(&TransactionDefinition::never(), |_| Ok::<_, TransactionError>(()))
                .unwrap_err();
            assert!(matches!(
                err,
                TransactionError::ExistingTransaction(Propagation::Never)
            ));
            assert_eq!(s.current().unwrap().status(), TxStatus::Active);
            s.insert(&items(), item("a"))?;
            Ok(())
        });
        result.unwrap();
        assert!(committed(&store, "a"));
    }

    #[test]
    fn test_nested_failure_rolls_back_to_savepoint_only() {
        let (store, manager) = setup();
        let mut session = manager.session();
        let result: Res<()> = session.run(&TransactionDefinition::required(), |s| {
            s.insert(&items(), item("outer"))?;
            let nested: Res<()> = s.run(&TransactionDefinition::nested(), |s| {
                assert_eq!(s.current().unwrap().kind(), ContextKind::Nested);
                assert_eq!(s.savepoint_depth(), 1);
                s.insert(&items(), item("inner"))?;
                fail()
            });
            assert!(nested.is_err());
            assert_eq!(s.savepoint_depth(), 0);
            assert_eq!(s.current().unwrap().status(), TxStatus::Active);
            assert!(s.read(&items(), &key("inner"))?.is_none());
            Ok(())
        });
        result.unwrap();

        let stats = store.stats();
        assert_eq!(stats.savepoints, 1);
        assert_eq!(stats.savepoint_rollbacks, 1);
        assert!(committed(&store, "outer"));
        assert!(!committed(&store, "inner"));
    }

    #[test]
    fn test_nested_success_releases_savepoint() {
        let (store, manager) = setup();
        let mut session = manager.session();
        let result: Res<()> = session.run(&TransactionDefinition::required(), |s| {
            s.run(&TransactionDefinition::nested(), |s| s.insert(&items(), item("inner")).map_err(Into::into))
        });
        result.unwrap();
        assert_eq!(store.stats().savepoint_releases, 1);
        assert!(committed(&store, "inner"));
    }

    #[test]
    fn test_nested_rollback_only_propagates_to_parent() {
        let (store, manager) = setup();
        let mut session = manager.session();
        let result: Res<()> = session.run(&TransactionDefinition::required(), |s| {
            s.insert(&items(), item("outer"))?;
            let nested: Res<()> = s.run(&TransactionDefinition::nested(), |s| s.set_rollback_only());
            assert!(matches!(nested, Err(TransactionError::RollbackOnly { .. })));
            assert!(s.current().unwrap().is_rollback_only());
            Ok(())
        });
        assert!(matches!(result, Err(TransactionError::RollbackOnly { .. })));
        assert!(!committed(&store, "outer"));
    }

    #[test]
    fn test_participant_failure_dooms_transaction() {
        let (store, manager) = setup();
        let mut session = manager.session();
        let result: Res<()> = session.run(&TransactionDefinition::required(), |s| {
            s.insert(&items(), item("a"))?;
            let inner: Res<()> = s.run(&TransactionDefinition::required(), |_| fail());
            assert!(inner.is_err());
            // swallowing the participant's error does not save the transaction
            Ok(())
        });
        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Rollback);
        assert!(!committed(&store, "a"));
        assert_eq!(store.stats().rollbacks, 1);
    }

    #[test]
    fn test_requires_new_survives_outer_rollback() {
        let (store, manager) = setup();
        let mut session = manager.session();
        let result: Res<()> = session.run(&TransactionDefinition::required(), |s| {
            let outer_conn = s.current_connection();
            s.insert(&items(), item("outer"))?;
            s.run(&TransactionDefinition::requires_new(), |s| -> Res<()> {
                assert_ne!(s.current_connection(), outer_conn);
                assert_eq!(s.depth(), 1);
                // the suspended transaction's writes are not visible here
                assert!(s.read(&items(), &key("outer"))?.is_none());
                s.insert(&items(), item("audit"))?;
                Ok(())
            })?;
            assert_eq!(s.current_connection(), outer_conn);
            fail()
        });
        assert!(result.is_err());
        assert!(committed(&store, "audit"));
        assert!(!committed(&store, "outer"));
    }

    #[test]
    fn test_not_supported_writes_are_immediately_visible() {
        let (store, manager) = setup();
        let mut session = manager.session();
        let result: Res<()> = session.run(&TransactionDefinition::required(), |s| {
            s.run(&TransactionDefinition::not_supported(), |s| {
                assert!(!s.is_transaction_active());
                assert_eq!(s.current().unwrap().kind(), ContextKind::None);
                s.insert(&items(), item("direct")).map_err(TransactionError::from)
            })?;
            assert!(committed(&store, "direct"));
            assert!(s.is_transaction_active());
            Ok(())
        });
        result.unwrap();
        assert_eq!(manager.pool().stats().acquired, 1);
    }

    #[test]
    fn test_supports_without_transaction_then_required() {
        let (store, manager) = setup();
        let mut session = manager.session();
        let result: Res<()> = session.run(&TransactionDefinition::supports(), |s| {
            assert!(!s.is_transaction_active());
            s.run(&TransactionDefinition::required(), |s| {
                assert_eq!(s.current().unwrap().kind(), ContextKind::Physical);
                Ok(())
            })
        });
        result.unwrap();
        assert_eq!(store.stats().begins, 1);
    }

    #[test]
    fn test_isolation_conflict_is_recorded() {
        let (_store, manager) = setup();
        let mut session = manager.session();
        let outer = TransactionDefinition::required().isolation(IsolationLevel::Serializable);
        let result: Res<()> = session.run(&outer, |s| {
            let inner = TransactionDefinition::required().isolation(IsolationLevel::ReadCommitted);
            s.run(&inner, |s| {
                assert_eq!(s.current().unwrap().isolation(), IsolationLevel::Serializable);
                Ok(())
            })
        });
        result.unwrap();
        assert_eq!(session.warnings().len(), 1);
        assert_eq!(session.warnings()[0].requested, IsolationLevel::ReadCommitted);
    }

    #[test]
    fn test_strict_isolation_rejects_join() {
        let (_store, manager) =
            setup_with(TransactionConfig::new().validate_existing_isolation(true));
        let mut session = manager.session();
        let outer = TransactionDefinition::required().isolation(IsolationLevel::Serializable);
        let result: Res<()> = session.run(&outer, |s| {
            let inner = TransactionDefinition::mandatory().isolation(IsolationLevel::RepeatableRead);
            s.run(&inner, |_| Ok(()))
        });
        assert!(matches!(
            result,
            Err(TransactionError::IsolationMismatch { .. })
        ));
    }

    #[test]
    fn test_pool_exhaustion_is_a_resource_error() {
        let (_store, manager) = setup_with(
            TransactionConfig::new()
                .pool_size(1)
                .acquire_timeout(Duration::from_millis(20)),
        );
        let mut session = manager.session();
        let result: Res<()> = session.run(&TransactionDefinition::required(), |s| {
            s.run(&TransactionDefinition::requires_new(), |_| Ok(()))
        });
        let err = result.unwrap_err();
        assert!(matches!(err, TransactionError::PoolExhausted { .. }));
        assert_eq!(err.kind(), ErrorKind::Resource);
        assert_eq!(manager.pool().in_use(), 0);
    }

    #[test]
    fn test_commit_failure_forces_rollback() {
        let (store, manager) = setup();
        let mut session = manager.session();
        store.fail_next(StorageOp::Commit);
        let result: Res<()> = session.run(&TransactionDefinition::required(), |s| {
            s.insert(&items(), item("a")).map_err(Into::into)
        });
        assert!(matches!(
            result,
            Err(TransactionError::Resource {
                op: StorageOp::Commit,
                ..
            })
        ));
        assert!(!committed(&store, "a"));
        assert_eq!(store.open_connections(), 0);
        assert_eq!(manager.pool().in_use(), 0);
    }

    #[test]
    fn test_panic_unwinds_every_open_unit() {
        let (store, manager) = setup();
        let mut session = manager.session();
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            let _: Res<()> = session.run(&TransactionDefinition::required(), |s| -> Res<()> {
                s.insert(&items(), item("outer"))?;
                s.run(&TransactionDefinition::requires_new(), |s| -> Res<()> {
                    s.run(&TransactionDefinition::nested(), |s| -> Res<()> {
                        s.insert(&items(), item("inner"))?;
                        panic!("caller gave up");
                    })
                })
            });
        }));
        assert!(outcome.is_err());
        assert_eq!(session.depth(), 0);
        assert_eq!(manager.pool().in_use(), 0);
        assert_eq!(manager.active_count(), 0);
        assert_eq!(store.open_connections(), 0);
        assert_eq!(store.stats().rollbacks, 2);
        assert_eq!(store.stats().savepoint_rollbacks, 1);
        assert!(!committed(&store, "outer"));
        assert!(!committed(&store, "inner"));

        assert_eq!(session.abort(), 0);
    }

    #[test]
    fn test_session_usable_after_caught_panic() {
        let (store, manager) = setup();
        let mut session = manager.session();
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            let _: Res<()> = session.run(&TransactionDefinition::required(), |_| panic!("gave up"));
        }));
        assert!(outcome.is_err());
        assert_eq!(session.depth(), 0);
        assert!(!session.is_transaction_active());

        let result: Res<()> = session.run(&TransactionDefinition::required(), |s| {
            s.insert(&items(), item("later")).map_err(Into::into)
        });
        result.unwrap();
        assert!(committed(&store, "later"));
        assert_eq!(store.stats().begins, 2);
        assert_eq!(store.stats().commits, 1);
    }

    #[test]
    fn test_failed_savepoint_rollback_dooms_transaction() {
        let (store, manager) = setup();
        let mut session = manager.session();
        let result: Res<()> = session.run(&TransactionDefinition::required(), |s| {
            s.insert(&items(), item("outer"))?;
            store.fail_next(StorageOp::RollbackToSavepoint);
            let nested: Res<()> = s.run(&TransactionDefinition::nested(), |s| {
                s.insert(&items(), item("inner"))?;
                fail()
            });
            // the caller sees its own error, the storage failure is logged
            assert!(matches!(nested, Err(TransactionError::Business(_))));
            assert_eq!(s.depth(), 1);
            assert!(s.current().unwrap().is_rollback_only());
            Ok(())
        });
        assert!(matches!(result, Err(TransactionError::RollbackOnly { .. })));
        assert!(!committed(&store, "outer"));
        assert!(!committed(&store, "inner"));
        assert_eq!(store.stats().commits, 0);
        assert_eq!(store.open_connections(), 0);
        assert_eq!(manager.pool().in_use(), 0);
    }

    #[test]
    fn test_failed_savepoint_release_dooms_transaction() {
        let (store, manager) = setup();
        let mut session = manager.session();
        let result: Res<()> = session.run(&TransactionDefinition::required(), |s| {
            store.fail_next(StorageOp::ReleaseSavepoint);
            let nested: Res<()> = s.run(&TransactionDefinition::nested(), |s| {
                s.insert(&items(), item("inner")).map_err(Into::into)
            });
            assert!(matches!(
                nested,
                Err(TransactionError::Resource {
                    op: StorageOp::ReleaseSavepoint,
                    ..
                })
            ));
            assert!(s.current().unwrap().is_rollback_only());
            Ok(())
        });
        assert!(matches!(result, Err(TransactionError::RollbackOnly { .. })));
        assert!(!committed(&store, "inner"));
        assert_eq!(store.stats().commits, 0);
        assert_eq!(manager.active_count(), 0);
    }

    #[test]
    fn test_failed_rollback_returns_body_error() {
        let (store, manager) = setup();
        let mut session = manager.session();
        store.fail_next(StorageOp::Rollback);
        let result: Res<()> = session.run(&TransactionDefinition::required(), |s| {
            s.insert(&items(), item("a"))?;
            fail()
        });
        assert!(matches!(result, Err(TransactionError::Business(_))));
        assert!(!committed(&store, "a"));
        // no second attempt from the holder's drop
        assert_eq!(store.stats().rollbacks, 1);
        assert_eq!(store.stats().commits, 0);
        assert_eq!(session.depth(), 0);
        assert_eq!(manager.pool().in_use(), 0);
        assert_eq!(manager.active_count(), 0);
    }

    #[test]
    fn test_dropping_session_rolls_back() {
        let (store, manager) = setup();
        {
            let mut session = manager.session();
            let _ = catch_unwind(AssertUnwindSafe(|| {
                let _: Res<()> = session.run(&TransactionDefinition::required(), |s| -> Res<()> {
                    s.insert(&items(), item("a"))?;
                    panic!("abandoned");
                });
            }));
        }
        assert_eq!(store.open_connections(), 0);
        assert_eq!(manager.pool().in_use(), 0);
        assert!(!committed(&store, "a"));
    }
}
