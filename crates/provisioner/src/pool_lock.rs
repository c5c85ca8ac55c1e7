//! Per-pool advisory locks
//!
//! Volume names are unique within a pool, so check-then-create and delete
//! must not interleave for the same pool within one process.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Async mutexes keyed by pool name
#[derive(Debug, Clone, Default)]
pub struct PoolLocks {
    locks: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl PoolLocks {
    /// Create an empty lock table
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for and hold the lock of `pool`
    pub async fn lock(&self, pool: &str) -> OwnedMutexGuard<()> {
        let mutex = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(pool.to_string()).or_default())
        };
        mutex.lock_owned().await
    }
}
