//! Logical transaction units.
//!
//! A [`TransactionContext`] describes one unit on the context stack: what it
//! owns (a physical transaction, a savepoint in its ancestor's transaction, or
//! nothing), the isolation it runs at, and where it is in its lifecycle.

use std::fmt;

use chrono::{DateTime, Utc};
use ulid::Ulid;

use crate::transaction::isolation::IsolationLevel;

/// Unique identifier of a transaction context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(Ulid);

impl ContextId {
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_string().to_lowercase())
    }
}

/// Lifecycle state of a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    Active,
    MarkedRollbackOnly,
    Committed,
    RolledBack,
}

impl TxStatus {
    /// Committed or rolled back.
    pub fn is_completed(&self) -> bool {
        matches!(self, TxStatus::Committed | TxStatus::RolledBack)
    }
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TxStatus::Active => "active",
            TxStatus::MarkedRollbackOnly => "rollback-only",
            TxStatus::Committed => "committed",
            TxStatus::RolledBack => "rolled back",
        };
        f.write_str(name)
    }
}

/// What a context owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextKind {
    /// Owns a real begin/commit on its own connection.
    Physical,
    /// Owns a savepoint inside its nearest physical ancestor.
    Nested,
    /// Runs without a transaction.
    None,
}

impl fmt::Display for ContextKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ContextKind::Physical => "physical",
            ContextKind::Nested => "nested",
            ContextKind::None => "none",
        };
        f.write_str(name)
    }
}

/// One logical transaction unit.
#[derive(Debug, Clone)]
pub struct TransactionContext {
    id: ContextId,
    name: Option<String>,
    kind: ContextKind,
    isolation: IsolationLevel,
    read_only: bool,
    status: TxStatus,
    parent: Option<ContextId>,
    started_at: DateTime<Utc>,
}

impl TransactionContext {
    pub(crate) fn new(
        kind: ContextKind,
        isolation: IsolationLevel,
        read_only: bool,
        parent: Option<ContextId>,
        name: Option<String>,
    ) -> Self {
        Self {
            id: ContextId::new(),
            name,
            kind,
            isolation,
            read_only,
            status: TxStatus::Active,
            parent,
            started_at: Utc::now(),
        }
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    /// Operation name from the definition, if any.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn kind(&self) -> ContextKind {
        self.kind
    }

    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn status(&self) -> TxStatus {
        self.status
    }

    /// Enclosing context, `None` for a root.
    pub fn parent(&self) -> Option<ContextId> {
        self.parent
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// True for physical and nested contexts.
    pub fn is_transactional(&self) -> bool {
        self.kind != ContextKind::None
    }

    pub fn is_rollback_only(&self) -> bool {
        self.status == TxStatus::MarkedRollbackOnly
    }

    /// Mark an active context rollback-only.
    ///
    /// Returns false if the context had already completed.
    pub(crate) fn mark_rollback_only(&mut self) -> bool {
        match self.status {
            TxStatus::Active => {
                self.status = TxStatus::MarkedRollbackOnly;
                true
            }
            TxStatus::MarkedRollbackOnly => true,
            TxStatus::Committed | TxStatus::RolledBack => false,
        }
    }

    pub(crate) fn set_committed(&mut self) {
        debug_assert_eq!(self.status, TxStatus::Active);
        self.status = TxStatus::Committed;
    }

    pub(crate) fn set_rolled_back(&mut self) {
        self.status = TxStatus::RolledBack;
    }

    /// Short label for log lines: the operation name or the id.
    pub(crate) fn label(&self) -> String {
        match &self.name {
            Some(name) => format!("{} [{}]", name, self.id),
            None => self.id.to_string(),
        }
    }
}
