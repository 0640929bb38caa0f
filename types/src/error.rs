//! Parse errors for the shared types.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TypeError {
    #[error("unknown right: {0}")]
    UnknownRight(String),

    #[error("identifier must not be empty")]
    EmptyIdentifier,

    #[error("identifier {0:?} contains a reserved character")]
    ReservedCharacter(String),

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),
}
