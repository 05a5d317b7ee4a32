//! Bounded connection pool.
//!
//! Each physical transaction holds one [`PoolPermit`] for its whole
//! lifetime; the permit goes back to the pool when dropped.

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, trace};
use parking_lot::{Condvar, Mutex};

use crate::transaction::error::{TransactionError, TransactionResult};

struct PoolState {
    in_use: usize,
    peak: usize,
    acquired: u64,
    timeouts: u64,
}

struct ConnectionPoolInner {
    max_connections: usize,
    state: Mutex<PoolState>,
    released: Condvar,
}

/// Connection pool statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub in_use: usize,
    pub peak: usize,
    pub acquired: u64,
    pub timeouts: u64,
}

/// Connection pool for physical transactions.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<ConnectionPoolInner>,
}

impl ConnectionPool {
    /// Create a new connection pool.
    pub fn new(max_connections: usize) -> Self {
        Self {
            inner: Arc::new(ConnectionPoolInner {
                max_connections: max_connections.max(1),
                state: Mutex::new(PoolState {
                    in_use: 0,
                    peak: 0,
                    acquired: 0,
                    timeouts: 0,
                }),
                released: Condvar::new(),
            }),
        }
    }

    /// Take a connection slot, waiting at most `timeout` for one to free up.
    pub fn acquire(&self, timeout: Duration) -> TransactionResult<PoolPermit> {
        let started = Instant::now();
        let deadline = started + timeout;
        let mut state = self.inner.state.lock();

        while state.in_use >= self.inner.max_connections {
            trace!("Pool full ({} in use), waiting", state.in_use);
            let timed_out = self
                .inner
                .released
                .wait_until(&mut state, deadline)
                .timed_out();
            if timed_out && state.in_use >= self.inner.max_connections {
                state.timeouts += 1;
                debug!(
                    "Pool exhausted after {:?} ({} connections)",
                    started.elapsed(),
                    self.inner.max_connections
                );
                return Err(TransactionError::PoolExhausted {
                    pool_size: self.inner.max_connections,
                    waited_ms: started.elapsed().as_millis() as u64,
                });
            }
        }

        state.in_use += 1;
        state.acquired += 1;
        state.peak = state.peak.max(state.in_use);
        Ok(PoolPermit {
            pool: self.inner.clone(),
        })
    }

    /// Maximum number of connections.
    pub fn capacity(&self) -> usize {
        self.inner.max_connections
    }

    /// Get the number of available connections.
    pub fn available(&self) -> usize {
        self.inner.max_connections - self.inner.state.lock().in_use
    }

    /// Get the number of connections currently handed out.
    pub fn in_use(&self) -> usize {
        self.inner.state.lock().in_use
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.inner.state.lock();
        PoolStats {
            in_use: state.in_use,
            peak: state.peak,
            acquired: state.acquired,
            timeouts: state.timeouts,
        }
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("capacity", &self.capacity())
            .field("in_use", &self.in_use())
            .finish()
    }
}

/// A connection slot taken from the pool.
pub struct PoolPermit {
    pool: Arc<ConnectionPoolInner>,
}

impl Drop for PoolPermit {
    fn drop(&mut self) {
        // Return the slot and wake one waiter.
        let mut state = self.pool.state.lock();
        state.in_use -= 1;
        drop(state);
        self.pool.released.notify_one();
    }
}
