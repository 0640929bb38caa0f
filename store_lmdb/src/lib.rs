//! LMDB ledger backend for the Accord engine.
//!
//! Implements [`accord_store::LedgerKv`] using the `heed` LMDB bindings. All
//! ledger state lives in one named database inside a single environment.
//! LMDB serializes write transactions, which gives `fetch_add` its atomicity
//! even across processes sharing the environment.

pub mod environment;
pub mod error;
pub mod ledger;

pub use environment::LmdbEnvironment;
pub use error::LmdbError;
pub use ledger::LmdbLedgerStore;
