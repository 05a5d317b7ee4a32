//! Declarative transaction management for enrolldb.
//!
//! Units of work declare a propagation mode and an isolation level and run
//! through [`Session::run`]. The session keeps an explicit stack of the
//! units executing on its call path and decides, per unit, whether to join
//! the open transaction, start a new physical one, open a savepoint, or run
//! without a transaction.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   TransactionManager                        │
//! │  (backend, connection pool, config, open transactions)      │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ session()
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Session                              │
//! │  run(definition, body): resolve → enter → body → complete   │
//! └─────────────────────────────────────────────────────────────┘
//!        │                     │                     │
//!        ▼                     ▼                     ▼
//!  ┌─────────────┐       ┌─────────────┐       ┌─────────────┐
//!  │ Propagation │       │ Context     │       │  Resource   │
//!  │  resolver   │       │   stack     │       │   holder    │
//!  └─────────────┘       └─────────────┘       └─────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use enrolldb::transaction::{TransactionDefinition, TransactionManager, IsolationLevel};
//!
//! let manager = TransactionManager::new(store);
//! let mut session = manager.session();
//!
//! session.run(&TransactionDefinition::required(), |s| {
//!     s.insert(&courses, row)?;
//!
//!     // Commits on its own connection even if the outer unit fails
//!     s.run(&TransactionDefinition::requires_new(), |s| s.insert(&log, entry))?;
//!
//!     // Failure here only rolls back to the savepoint
//!     let _ = s.run(&TransactionDefinition::nested(), |s| adjust(s));
//!     Ok(())
//! })?;
//! ```

mod config;
mod context;
mod definition;
mod error;
mod isolation;
mod manager;
mod pool;
mod propagation;
mod resource;
mod session;
mod stack;

pub use config::TransactionConfig;
pub use context::{ContextId, ContextKind, TransactionContext, TxStatus};
pub use definition::TransactionDefinition;
pub use error::{ErrorKind, TransactionError, TransactionResult};
pub use isolation::IsolationLevel;
pub use manager::{TransactionManager, TransactionMetadata};
pub use pool::{ConnectionPool, PoolPermit, PoolStats};
pub use propagation::{resolve, Action, IsolationConflict, Propagation, Resolution};
pub use resource::ResourceHolder;
pub use session::Session;
pub use stack::{ContextStack, SuspendedStack};
