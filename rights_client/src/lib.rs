//! Cross-service rights client.
//!
//! Workflow services that do not share a process with the rights registry
//! check and grant rights through this client. Calls go through a
//! [`Transport`]: HTTP in production, [`NullTransport`] in tests.
//!
//! Design:
//! - Every call has an explicit timeout. A timeout or refused connection is
//!   a retryable error and is never reported as a denial.
//! - Remote errors are wrapped with the asset and rights being checked.
//! - [`RightsClient`] implements [`accord_rights::RightsAuthority`], so the
//!   workflow coordinator can run against a remote registry unchanged.

pub mod client;
pub mod error;
pub mod transport;

pub use client::{RightsClient, DEFAULT_TIMEOUT};
pub use error::{ClientError, TransportError};
pub use transport::{HttpTransport, NullTransport, RecordedCall, Transport, PARTICIPANT_HEADER};
