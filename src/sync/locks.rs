use std::{hash::Hash, sync::Arc};

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Named non-blocking locks created on first use.
///
/// Guards are owned, so they can be held across `.await` points and get
/// released on every exit path when dropped.
#[derive(Debug)]
pub struct LockArena<K: Eq + Hash> {
    locks: DashMap<K, Arc<Mutex<()>>>,
}

impl<K: Eq + Hash> Default for LockArena<K> {
    fn default() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }
}

impl<K: Eq + Hash> LockArena<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes the lock of `key` if nobody holds it.
    pub fn try_acquire(&self, key: K) -> Option<OwnedMutexGuard<()>> {
        let lock = self.locks.entry(key).or_default().clone();
        lock.try_lock_owned().ok()
    }

    /// Indicates whether the lock of `key` is currently held.
    pub fn is_held(&self, key: &K) -> bool {
        self.locks
            .get(key)
            .is_some_and(|lock| lock.try_lock().is_err())
    }
}
