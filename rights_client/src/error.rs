use accord_rights::AuthorityError;
use accord_types::{AssetId, IdentityError, ParticipantId, RightSet};
use thiserror::Error;

/// Failures of a single transport call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("service unreachable: {0}")]
    Unreachable(String),

    /// The remote service answered with a structured error.
    #[error("{kind}: {message}")]
    Remote { kind: String, message: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("request failed: {0}")]
    RequestFailed(String),
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("cannot resolve caller: {0}")]
    Identity(#[from] IdentityError),

    #[error("asset {0} not found")]
    NotFound(AssetId),

    #[error("{participant} lacks {missing} on {asset}")]
    Authorization {
        participant: ParticipantId,
        asset: AssetId,
        missing: RightSet,
    },

    #[error("{context}: timed out: {message}")]
    Timeout { context: String, message: String },

    #[error("{context}: rights service unreachable: {message}")]
    Unreachable { context: String, message: String },

    #[error("{context}: {source}")]
    Remote {
        context: String,
        #[source]
        source: TransportError,
    },

    #[error("invalid rights service address: {0}")]
    InvalidAddress(String),
}

impl ClientError {
    /// Wrap a transport failure with what was being attempted.
    pub(crate) fn from_transport(context: String, e: TransportError) -> Self {
        match e {
            TransportError::Timeout(message) => ClientError::Timeout { context, message },
            TransportError::Unreachable(message) => ClientError::Unreachable { context, message },
            other => ClientError::Remote {
                context,
                source: other,
            },
        }
    }

    /// Timeouts and connection failures are never authorization denials.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClientError::Timeout { .. } | ClientError::Unreachable { .. })
    }
}

/// Keeps the class of the remote answer so callers can still tell a denial
/// or a missing asset from a broken service.
impl From<ClientError> for AuthorityError {
    fn from(e: ClientError) -> Self {
        let message = e.to_string();
        match e {
            ClientError::Timeout { .. } => AuthorityError::Timeout(message),
            ClientError::Unreachable { .. } => AuthorityError::Unavailable(message),
            ClientError::NotFound(_) => AuthorityError::NotFound(message),
            ClientError::Authorization { .. } => AuthorityError::Denied(message),
            ClientError::Remote { source, .. } => match source {
                TransportError::InvalidResponse(_) => AuthorityError::InvalidResponse(message),
                TransportError::Remote { kind, .. } => match kind.as_str() {
                    "not_found" => AuthorityError::NotFound(message),
                    "unauthorized" => AuthorityError::Denied(message),
                    "already_exists" => AuthorityError::Conflict(message),
                    _ => AuthorityError::Rejected(message),
                },
                _ => AuthorityError::Rejected(message),
            },
            ClientError::Identity(_) | ClientError::InvalidAddress(_) => {
                AuthorityError::Rejected(message)
            }
        }
    }
}
