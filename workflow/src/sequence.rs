//! Durable id generation.
//!
//! Counters live in the ledger at `seq/<prefix>` and advance through the
//! store's atomic `fetch_add`, so ids survive restarts and concurrent callers
//! never share one.

use accord_store::{LedgerKv, StoreError};
use accord_types::AssetId;
use tracing::debug;

const SEQUENCE_PREFIX: &str = "seq/";

pub struct SequenceGenerator<S> {
    kv: S,
}

impl<S: LedgerKv> SequenceGenerator<S> {
    pub fn new(kv: S) -> Self {
        Self { kv }
    }

    /// `<prefix>-<n>`, starting at 0.
    pub fn next(&self, prefix: &str) -> Result<AssetId, StoreError> {
        let n = self.advance(prefix)?;
        Ok(AssetId::new(format!("{prefix}-{n}")))
    }

    /// `<prefix>-<discriminator>-<n>`. The counter is shared with [`Self::next`]
    /// for the same prefix.
    pub fn next_with(&self, prefix: &str, discriminator: &str) -> Result<AssetId, StoreError> {
        let n = self.advance(prefix)?;
        Ok(AssetId::new(format!("{prefix}-{discriminator}-{n}")))
    }

    fn advance(&self, prefix: &str) -> Result<u64, StoreError> {
        let n = self.kv.fetch_add(&format!("{SEQUENCE_PREFIX}{prefix}"), 1)?;
        debug!(prefix, n, "issued sequence number");
        Ok(n)
    }
}
