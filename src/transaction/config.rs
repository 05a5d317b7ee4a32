//! Transaction manager configuration.

use std::time::Duration;

use crate::transaction::isolation::IsolationLevel;

/// Transaction manager configuration options.
#[derive(Debug, Clone)]
pub struct TransactionConfig {
    /// Maximum number of physical transactions open at once.
    pub pool_size: usize,
    /// How long to wait for a free connection before failing.
    pub acquire_timeout: Duration,
    /// Isolation for new physical transactions that don't declare one.
    pub default_isolation: IsolationLevel,
    /// Reject joining a transaction at a different isolation instead of
    /// warning and keeping the existing one.
    pub validate_existing_isolation: bool,
    /// Allow NESTED to create savepoints inside an open transaction.
    pub nested_transactions: bool,
    /// Enable verbose logging.
    pub verbose: bool,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            pool_size: 10,
            acquire_timeout: Duration::from_secs(5),
            default_isolation: IsolationLevel::ReadCommitted,
            validate_existing_isolation: false,
            nested_transactions: true,
            verbose: false,
        }
    }
}

impl TransactionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set pool_size. Zero is raised to one.
    pub fn pool_size(mut self, value: usize) -> Self {
        self.pool_size = value.max(1);
        self
    }

    /// Set acquire_timeout.
    pub fn acquire_timeout(mut self, value: Duration) -> Self {
        self.acquire_timeout = value;
        self
    }

    /// Set default_isolation.
    pub fn default_isolation(mut self, value: IsolationLevel) -> Self {
        self.default_isolation = value;
        self
    }

    /// Set validate_existing_isolation flag.
    pub fn validate_existing_isolation(mut self, value: bool) -> Self {
        self.validate_existing_isolation = value;
        self
    }

    /// Set nested_transactions flag.
    pub fn nested_transactions(mut self, value: bool) -> Self {
        self.nested_transactions = value;
        self
    }

    /// Set verbose flag.
    pub fn verbose(mut self, value: bool) -> Self {
        self.verbose = value;
        self
    }
}
