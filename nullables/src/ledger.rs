//! Nullable ledger: a thread-safe in-memory key-value store for testing.
//!
//! Supports write-failure injection so partial fan-out can be exercised:
//! after [`NullLedger::fail_writes_after`] the given number of successful
//! writes, every further write fails with a backend error until
//! [`NullLedger::heal`] is called.

use accord_store::{decode_counter, encode_counter, LedgerKv, StoreError};
use std::collections::BTreeMap;
use std::sync::Mutex;

pub struct NullLedger {
    entries: Mutex<BTreeMap<String, Vec<u8>>>,
    /// Remaining writes before injected failures start; `None` never fails.
    writes_before_failure: Mutex<Option<usize>>,
    write_count: Mutex<u64>,
}

impl NullLedger {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
            writes_before_failure: Mutex::new(None),
            write_count: Mutex::new(0),
        }
    }

    /// Let `n` more writes succeed, then fail every write after that.
    pub fn fail_writes_after(&self, n: usize) {
        *self.writes_before_failure.lock().unwrap() = Some(n);
    }

    /// Stop injecting failures.
    pub fn heal(&self) {
        *self.writes_before_failure.lock().unwrap() = None;
    }

    /// Number of successful writes so far.
    pub fn write_count(&self) -> u64 {
        *self.write_count.lock().unwrap()
    }

    /// All keys currently stored (for assertions).
    pub fn keys(&self) -> Vec<String> {
        self.entries.lock().unwrap().keys().cloned().collect()
    }

    fn admit_write(&self, key: &str) -> Result<(), StoreError> {
        let mut budget = self.writes_before_failure.lock().unwrap();
        match budget.as_mut() {
            Some(0) => Err(StoreError::Backend(format!(
                "injected write failure on '{key}'"
            ))),
            Some(n) => {
                *n -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn record_write(&self) {
        *self.write_count.lock().unwrap() += 1;
    }
}

impl Default for NullLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl LedgerKv for NullLedger {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.admit_write(key)?;
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_vec());
        self.record_write();
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.admit_write(key)?;
        self.entries.lock().unwrap().remove(key);
        self.record_write();
        Ok(())
    }

    fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.entries.lock().unwrap().contains_key(key))
    }

    fn fetch_add(&self, key: &str, delta: u64) -> Result<u64, StoreError> {
        self.admit_write(key)?;
        let mut entries = self.entries.lock().unwrap();
        let current = match entries.get(key) {
            Some(bytes) => decode_counter(key, bytes)?,
            None => 0,
        };
        let next = current
            .checked_add(delta)
            .ok_or_else(|| StoreError::Corruption(format!("counter '{key}' would overflow")))?;
        entries.insert(key.to_string(), encode_counter(next).to_vec());
        drop(entries);
        self.record_write();
        Ok(current)
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}
