//! Per-key write serialization.
//!
//! Read-modify-write of a whole record (a mailbox, a rights record) is a
//! read-then-write race when two operations target the same key. Writers
//! take the key's lock for the duration of the cycle; different keys
//! proceed in parallel.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Default)]
pub struct KeyedLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the lock for `key`.
    fn lock_for(&self, key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Run `f` while holding the lock for `key`.
    ///
    /// The key's entry is dropped again once nobody else holds or waits on
    /// it, so the map only ever contains keys that are in use.
    pub fn with_lock<R>(&self, key: &str, f: impl FnOnce() -> R) -> R {
        let lock = self.lock_for(key);
        let result = {
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            f()
        };
        self.release(key, lock);
        result
    }

    fn release(&self, key: &str, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // Ours plus the map's; anyone else still needs the entry.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(key);
        }
    }

    /// Number of keys with a lock currently allocated.
    pub fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
