//! Rights Registry: the single source of truth for "who may do what to
//! which asset".
//!
//! Design:
//! - A [`RightsRecord`] maps each participant holding rights on one asset
//!   to a [`RightSet`](accord_types::RightSet). Records are created lazily on
//!   the first grant and never deleted.
//! - Grants are an idempotent union. There is no revocation: a lockout after
//!   accept/reject has to be modelled as a new asset id, not a mutation of an
//!   existing grant.
//! - The registry also resolves logical service names to addresses so that
//!   workflow services can find each other without hard-coded addresses.
//! - [`RightsAuthority`] is the seam workflow code uses; it is implemented
//!   locally by [`LocalRights`] and remotely by the cross-service client.

pub mod authority;
pub mod error;
pub mod record;
pub mod registry;

pub use authority::{LocalRights, RightsAuthority};
pub use error::{AuthorityError, RightsError};
pub use record::{AssetRightsResponse, HolderEntry, RightsRecord};
pub use registry::RightsRegistry;
