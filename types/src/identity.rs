//! The identity collaborator seam.
//!
//! Authentication is not performed by the engine. A trusted collaborator
//! (certificate attributes, a fronting proxy, a test double) resolves the
//! participant id of whoever invoked the current operation.

use thiserror::Error;

use crate::ParticipantId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    #[error("caller identity is not available: {0}")]
    Unavailable(String),

    #[error("caller identity is malformed: {0}")]
    Malformed(String),
}

/// Resolves the participant id of the current caller.
///
/// Failure is fatal to the invoking operation.
pub trait IdentityProvider: Send + Sync {
    fn current_caller(&self) -> Result<ParticipantId, IdentityError>;
}

impl<T: IdentityProvider + ?Sized> IdentityProvider for std::sync::Arc<T> {
    fn current_caller(&self) -> Result<ParticipantId, IdentityError> {
        (**self).current_caller()
    }
}
