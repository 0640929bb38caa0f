//! Fundamental types for the Accord negotiation engine.
//!
//! This crate defines the core types shared across every other crate in the workspace:
//! participant and asset identifiers, capability rights, timestamps, and the
//! identity seam through which a caller's participant id is resolved.

pub mod error;
pub mod id;
pub mod identity;
pub mod right;
pub mod time;

pub use error::TypeError;
pub use id::{AssetId, ParticipantId, ServiceName};
pub use identity::{IdentityError, IdentityProvider};
pub use right::{Right, RightSet};
pub use time::Timestamp;
