use accord_mailbox::MailboxError;
use accord_rights::AuthorityError;
use accord_store::StoreError;
use accord_types::{AssetId, ParticipantId, RightSet};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("asset already exists: {0}")]
    AlreadyExists(AssetId),

    /// A remote service reported the asset as taken.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("{0} uses a prefix reserved for generated ids")]
    ReservedId(AssetId),

    #[error("{participant} lacks {missing} on {asset}")]
    Authorization {
        participant: ParticipantId,
        asset: AssetId,
        missing: RightSet,
    },

    /// A remote service refused the caller.
    #[error("denied: {0}")]
    Denied(String),

    #[error("illegal state: {0}")]
    IllegalState(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("rights service error: {0}")]
    Remote(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("unavailable: {0}")]
    Unavailable(String),
}

impl WorkflowError {
    /// Only transport-level failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, WorkflowError::Timeout(_) | WorkflowError::Unavailable(_))
    }
}

impl From<MailboxError> for WorkflowError {
    fn from(e: MailboxError) -> Self {
        match e {
            MailboxError::Store(e) => WorkflowError::Store(e),
            MailboxError::MalformedRow { participant, reason } => WorkflowError::Store(
                StoreError::Corruption(format!("mailbox of {participant}: {reason}")),
            ),
        }
    }
}

impl From<AuthorityError> for WorkflowError {
    fn from(e: AuthorityError) -> Self {
        match e {
            AuthorityError::Store(e) => WorkflowError::Store(e),
            AuthorityError::Timeout(msg) => WorkflowError::Timeout(msg),
            AuthorityError::Unavailable(msg) => WorkflowError::Unavailable(msg),
            AuthorityError::NotFound(msg) => WorkflowError::NotFound(msg),
            AuthorityError::Denied(msg) => WorkflowError::Denied(msg),
            AuthorityError::Conflict(msg) => WorkflowError::Conflict(msg),
            AuthorityError::Rejected(msg) | AuthorityError::InvalidResponse(msg) => {
                WorkflowError::Remote(msg)
            }
        }
    }
}
