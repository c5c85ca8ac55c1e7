//! Reserved DHCP addresses
//!
//! Addresses handed to static DHCP host entries are reserved here before the
//! network is updated, so two machines created concurrently by the same
//! actuator never get the same address. The set is seeded once with the
//! leases the network already has.

use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::OnceCell;
use tracing::debug;

#[derive(Debug, Default)]
struct LeasesInner {
    items: Mutex<HashSet<String>>,
    loaded: OnceCell<()>,
}

/// Shared set of reserved addresses
#[derive(Debug, Clone, Default)]
pub struct ReservedLeases {
    inner: Arc<LeasesInner>,
}

impl ReservedLeases {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    fn items(&self) -> MutexGuard<'_, HashSet<String>> {
        self.inner.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seed the set with existing leases, once.
    ///
    /// A failed load leaves the set unseeded so the next caller retries.
    pub async fn ensure_loaded<F, Fut, E>(&self, load: F) -> Result<(), E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<String>, E>>,
    {
        self.inner
            .loaded
            .get_or_try_init(|| async {
                let existing = load().await?;
                debug!(count = existing.len(), "Seeding reserved leases");
                self.items().extend(existing);
                Ok(())
            })
            .await
            .map(|_| ())
    }

    /// Reserve the first candidate not already taken.
    ///
    /// `candidate(i)` produces the i-th address to try; the check and the
    /// insert happen under one lock.
    pub fn reserve_first<F, E>(&self, mut candidate: F) -> Result<String, E>
    where
        F: FnMut(u32) -> Result<String, E>,
    {
        let mut items = self.items();
        let mut attempt = 0;
        loop {
            let ip = candidate(attempt)?;
            if items.insert(ip.clone()) {
                return Ok(ip);
            }
            attempt += 1;
        }
    }

    /// Whether `ip` is reserved
    pub fn contains(&self, ip: &str) -> bool {
        self.items().contains(ip)
    }

    /// Release a reservation
    pub fn release(&self, ip: &str) -> bool {
        self.items().remove(ip)
    }

    /// Number of reserved addresses
    pub fn len(&self) -> usize {
        self.items().len()
    }

    /// Whether nothing is reserved
    pub fn is_empty(&self) -> bool {
        self.items().is_empty()
    }
}
