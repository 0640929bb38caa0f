use accord_store::StoreError;
use accord_types::AssetId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RightsError {
    #[error("no service registered under name {0}")]
    ServiceNotFound(String),

    #[error("invalid service address for {name}: {reason}")]
    InvalidAddress { name: String, reason: String },

    #[error("cannot claim {0} with an empty right set")]
    EmptyClaim(AssetId),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Errors surfaced through [`crate::RightsAuthority`], local or remote.
#[derive(Debug, Error)]
pub enum AuthorityError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("rights service timed out: {0}")]
    Timeout(String),

    #[error("rights service unavailable: {0}")]
    Unavailable(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("denied: {0}")]
    Denied(String),

    #[error("already exists: {0}")]
    Conflict(String),

    #[error("rights service rejected the call: {0}")]
    Rejected(String),

    #[error("invalid response from rights service: {0}")]
    InvalidResponse(String),
}

impl AuthorityError {
    /// Timeouts and connection failures may succeed on a later attempt;
    /// everything else is final for the current operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AuthorityError::Timeout(_) | AuthorityError::Unavailable(_))
    }
}
