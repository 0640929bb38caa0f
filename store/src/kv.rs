//! Ledger key-value interface.

use std::sync::Arc;

use crate::StoreError;

/// Key-value view of the ledger.
///
/// Reads observe the latest committed state. Each `put`, `delete` and
/// `fetch_add` is atomic on its own.
pub trait LedgerKv: Send + Sync {
    /// Read a value; `None` if the key is absent.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Write a value, replacing any previous one.
    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;

    /// Remove a key. Removing an absent key is not an error.
    fn delete(&self, key: &str) -> Result<(), StoreError>;

    fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.get(key)?.is_some())
    }

    /// Atomically add `delta` to the little-endian `u64` counter stored at
    /// `key` (absent counts as zero) and return the value *before* the add.
    fn fetch_add(&self, key: &str, delta: u64) -> Result<u64, StoreError>;

    /// All entries whose key starts with `prefix`, in key order.
    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError>;
}

impl<T: LedgerKv + ?Sized> LedgerKv for Arc<T> {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        (**self).get(key)
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        (**self).put(key, value)
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        (**self).delete(key)
    }

    fn exists(&self, key: &str) -> Result<bool, StoreError> {
        (**self).exists(key)
    }

    fn fetch_add(&self, key: &str, delta: u64) -> Result<u64, StoreError> {
        (**self).fetch_add(key, delta)
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        (**self).scan_prefix(prefix)
    }
}

/// Decode a stored counter value. Shared by every backend's `fetch_add`.
pub fn decode_counter(key: &str, bytes: &[u8]) -> Result<u64, StoreError> {
    let arr: [u8; 8] = bytes.try_into().map_err(|_| {
        StoreError::Corruption(format!(
            "counter '{key}' has unexpected byte length {}",
            bytes.len()
        ))
    })?;
    Ok(u64::from_le_bytes(arr))
}

pub fn encode_counter(value: u64) -> [u8; 8] {
    value.to_le_bytes()
}
