//! Nullable infrastructure for deterministic testing.
//!
//! All external collaborators of the engine (the ledger, the identity
//! provider) are abstracted behind traits. This crate provides test-friendly
//! implementations that:
//! - Return deterministic values
//! - Can be controlled programmatically (including injected failures)
//! - Never touch the filesystem or network
//!
//! Usage: swap real implementations for nullables in tests.

pub mod identity;
pub mod ledger;

pub use identity::NullIdentity;
pub use ledger::NullLedger;
