//! Transaction manager - shared state behind every session.
//!
//! The TransactionManager owns what call paths share:
//! - The storage backend
//! - The bounded connection pool
//! - Configuration
//! - Tracking of open physical transactions
//!
//! Call-path state (the context stack) lives in a [`Session`]; each call path
//! opens its own with [`TransactionManager::session`].

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::debug;
use parking_lot::RwLock;

use crate::storage::{ConnectionId, StorageBackend};
use crate::transaction::config::TransactionConfig;
use crate::transaction::context::{ContextId, TransactionContext};
use crate::transaction::definition::TransactionDefinition;
use crate::transaction::error::TransactionError;
use crate::transaction::isolation::IsolationLevel;
use crate::transaction::pool::ConnectionPool;
use crate::transaction::resource::ResourceHolder;
use crate::transaction::session::Session;

/// Information about an open physical transaction.
#[derive(Debug, Clone)]
pub struct TransactionMetadata {
    pub id: ContextId,
    pub name: Option<String>,
    pub isolation: IsolationLevel,
    pub read_only: bool,
    pub connection: ConnectionId,
    pub started_at: DateTime<Utc>,
}

/// Transaction manager - coordinates physical transactions.
///
/// Thread-safe: can be shared across threads via Clone (uses Arc internally).
#[derive(Clone)]
pub struct TransactionManager {
    inner: Arc<TransactionManagerInner>,
}

struct TransactionManagerInner {
    backend: Arc<dyn StorageBackend>,
    pool: ConnectionPool,
    config: TransactionConfig,
    /// Open physical transactions tracked by context id.
    active: RwLock<HashMap<ContextId, TransactionMetadata>>,
}

impl TransactionManager {
    /// Create a manager with the default configuration.
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self::with_config(backend, TransactionConfig::default())
    }

    pub fn with_config(backend: Arc<dyn StorageBackend>, config: TransactionConfig) -> Self {
        Self {
            inner: Arc::new(TransactionManagerInner {
                backend,
                pool: ConnectionPool::new(config.pool_size),
                config,
                active: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Open a fresh call path with an empty context stack.
    pub fn session(&self) -> Session {
        Session::new(self.clone())
    }

    /// Run `body` in a new session.
    ///
    /// The session is dropped afterwards, so nothing outlives the call.
    pub fn with_transaction<T, E, F>(&self, definition: &TransactionDefinition, body: F) -> Result<T, E>
    where
        E: From<TransactionError>,
        F: FnOnce(&mut Session) -> Result<T, E>,
    {
        self.session().run(definition, body)
    }

    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.inner.backend
    }

    pub fn config(&self) -> &TransactionConfig {
        &self.inner.config
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.inner.pool
    }

    /// Get the number of open physical transactions.
    pub fn active_count(&self) -> usize {
        self.inner.active.read().len()
    }

    /// List all open physical transaction ids.
    pub fn active_transactions(&self) -> Vec<ContextId> {
        self.inner.active.read().keys().copied().collect()
    }

    /// Check if a physical transaction is open.
    pub fn is_active(&self, id: ContextId) -> bool {
        self.inner.active.read().contains_key(&id)
    }

    /// Get metadata for an open physical transaction.
    pub fn get_transaction_info(&self, id: ContextId) -> Option<TransactionMetadata> {
        self.inner.active.read().get(&id).cloned()
    }

    /// Acquire a pooled connection and begin a physical transaction for
    /// `context`.
    pub(crate) fn begin_physical(
        &self,
        context: &TransactionContext,
    ) -> Result<ResourceHolder, TransactionError> {
        let permit = self.inner.pool.acquire(self.inner.config.acquire_timeout)?;
        let holder = ResourceHolder::begin(
            context.id(),
            self.inner.backend.clone(),
            permit,
            context.isolation(),
            context.is_read_only(),
        )?;

        let metadata = TransactionMetadata {
            id: context.id(),
            name: context.name().map(str::to_string),
            isolation: context.isolation(),
            read_only: context.is_read_only(),
            connection: holder.connection(),
            started_at: context.started_at(),
        };
        self.inner.active.write().insert(context.id(), metadata);
        debug!(
            "Began physical transaction {} at {} on {}",
            context.label(),
            context.isolation(),
            holder.connection()
        );
        Ok(holder)
    }

    /// Stop tracking a physical transaction (committed or rolled back).
    pub(crate) fn mark_completed(&self, id: ContextId) {
        self.inner.active.write().remove(&id);
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("active_count", &self.active_count())
            .field("pool", &self.inner.pool)
            .finish()
    }
}
