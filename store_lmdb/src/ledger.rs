//! LMDB implementation of LedgerKv.
//!
//! Keys are stored as their UTF-8 bytes; LMDB orders them lexicographically,
//! so prefix scans return entries in key order. LMDB limits keys to 511 bytes.

use std::sync::Arc;

use heed::types::Bytes;
use heed::{Database, Env};
use tracing::debug;

use accord_store::{decode_counter, encode_counter, LedgerKv, StoreError};

use crate::LmdbError;

pub struct LmdbLedgerStore {
    pub(crate) env: Arc<Env>,
    pub(crate) ledger_db: Database<Bytes, Bytes>,
}

impl LedgerKv for LmdbLedgerStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let rtxn = self.env.read_txn().map_err(LmdbError::from)?;
        let val = self
            .ledger_db
            .get(&rtxn, key.as_bytes())
            .map_err(LmdbError::from)?;
        Ok(val.map(<[u8]>::to_vec))
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let mut wtxn = self.env.write_txn().map_err(LmdbError::from)?;
        self.ledger_db
            .put(&mut wtxn, key.as_bytes(), value)
            .map_err(LmdbError::from)?;
        wtxn.commit().map_err(LmdbError::from)?;
        debug!(key, len = value.len(), "ledger put");
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut wtxn = self.env.write_txn().map_err(LmdbError::from)?;
        self.ledger_db
            .delete(&mut wtxn, key.as_bytes())
            .map_err(LmdbError::from)?;
        wtxn.commit().map_err(LmdbError::from)?;
        Ok(())
    }

    fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let rtxn = self.env.read_txn().map_err(LmdbError::from)?;
        let found = self
            .ledger_db
            .get(&rtxn, key.as_bytes())
            .map_err(LmdbError::from)?
            .is_some();
        Ok(found)
    }

    fn fetch_add(&self, key: &str, delta: u64) -> Result<u64, StoreError> {
        // Read and write inside one write transaction; LMDB admits a single
        // writer at a time, so no other increment can interleave.
        let mut wtxn = self.env.write_txn().map_err(LmdbError::from)?;
        let current = match self
            .ledger_db
            .get(&wtxn, key.as_bytes())
            .map_err(LmdbError::from)?
        {
            Some(bytes) => decode_counter(key, bytes)?,
            None => 0,
        };
        let next = current.checked_add(delta).ok_or_else(|| {
            StoreError::Corruption(format!("counter '{key}' would overflow"))
        })?;
        self.ledger_db
            .put(&mut wtxn, key.as_bytes(), &encode_counter(next))
            .map_err(LmdbError::from)?;
        wtxn.commit().map_err(LmdbError::from)?;
        Ok(current)
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        let rtxn = self.env.read_txn().map_err(LmdbError::from)?;
        let iter = self
            .ledger_db
            .prefix_iter(&rtxn, prefix.as_bytes())
            .map_err(LmdbError::from)?;
        let mut results = Vec::new();
        for entry in iter {
            let (key, val) = entry.map_err(LmdbError::from)?;
            let key = String::from_utf8(key.to_vec())
                .map_err(|e| LmdbError::InvalidKey(e.to_string()))?;
            results.push((key, val.to_vec()));
        }
        Ok(results)
    }
}
