//! Abstract ledger interfaces for the Accord engine.
//!
//! Every storage backend (LMDB, in-memory for testing) implements
//! [`LedgerKv`]. The legacy typed-row interface [`LedgerTable`] is provided
//! on top of any key-value backend by [`KvTables`]. The rest of the
//! codebase depends only on these traits.
//!
//! Each individual write is atomic in isolation. There are no cross-key
//! transactions: callers that touch several keys must make every write
//! idempotent.

pub mod codec;
pub mod error;
pub mod kv;
pub mod locks;
pub mod table;

pub use error::StoreError;
pub use kv::{decode_counter, encode_counter, LedgerKv};
pub use locks::KeyedLocks;
pub use table::{Column, ColumnDefinition, ColumnKind, KvTables, LedgerTable, Row};
