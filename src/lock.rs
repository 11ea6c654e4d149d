//! Advisory named-resource locks.
//!
//! A [`LockManager`] hands out at most one [`LockGuard`] per
//! `(namespace, key)` pair. Other acquirers of the same pair wait until the
//! guard is dropped, so the lock is released on every exit path of the
//! guarded section, including `?` propagation. Keys are independent: holding
//! one never blocks another, and callers only ever hold a single key at a
//! time, so no ordering discipline is needed.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::trace;

/// Namespace guarding cache and save workflows for one cached image.
pub const CACHED_IMAGES_NAMESPACE: &str = "cachedimages";

/// Namespace guarding lifecycle operations on one disk.
pub const DISKS_NAMESPACE: &str = "disks";

/// Identifies one lockable resource.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct LockKey {
    namespace: String,
    key: String,
}

impl LockKey {
    /// Creates a key from its namespace and resource key.
    #[must_use]
    pub fn new(namespace: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            key: key.into(),
        }
    }

    /// Returns the namespace component.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Returns the resource key component.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.key)
    }
}

type LockTable = HashMap<LockKey, Arc<AsyncMutex<()>>>;

/// Process-local lock table keyed by `(namespace, key)`.
///
/// Cloning the manager shares the table.
#[derive(Clone, Debug, Default)]
pub struct LockManager {
    table: Arc<Mutex<LockTable>>,
}

impl LockManager {
    /// Creates an empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until no one else holds `(namespace, key)` and takes it.
    ///
    /// There is no timeout: callers that wrap slow remote calls must bound
    /// those calls themselves.
    pub async fn acquire(&self, namespace: &str, key: &str) -> LockGuard {
        let lock_key = LockKey::new(namespace, key);
        let slot = {
            let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(table.entry(lock_key.clone()).or_default())
        };
        let guard = slot.lock_owned().await;
        trace!(lock = %lock_key, "lock acquired");
        LockGuard {
            key: lock_key,
            guard: Some(guard),
            table: Arc::clone(&self.table),
        }
    }

    /// Returns `true` when some unit of work currently holds the key.
    #[must_use]
    pub fn is_held(&self, namespace: &str, key: &str) -> bool {
        let table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        table
            .get(&LockKey::new(namespace, key))
            .is_some_and(|slot| slot.try_lock().is_err())
    }

    /// Number of keys currently tracked by the table.
    #[must_use]
    pub fn tracked_keys(&self) -> usize {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Scoped hold on one lock key; dropping it releases the key.
#[derive(Debug)]
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct LockGuard {
    key: LockKey,
    guard: Option<OwnedMutexGuard<()>>,
    table: Arc<Mutex<LockTable>>,
}

impl LockGuard {
    /// Returns the key held by this guard.
    #[must_use]
    pub const fn key(&self) -> &LockKey {
        &self.key
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        // Waiters clone the slot under the table lock, so a count of one
        // means nobody else is holding or waiting.
        if table
            .get(&self.key)
            .is_some_and(|slot| Arc::strong_count(slot) == 1)
        {
            table.remove(&self.key);
        }
        trace!(lock = %self.key, "lock released");
    }
}
