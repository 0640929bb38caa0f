use accord_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MailboxError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("malformed mailbox row for {participant}: {reason}")]
    MalformedRow { participant: String, reason: String },
}
