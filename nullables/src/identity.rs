//! Nullable identity: a caller identity that tests set directly.

use accord_types::{IdentityError, IdentityProvider, ParticipantId};
use std::sync::Mutex;

/// A deterministic identity provider for testing.
///
/// Returns whichever participant was last set; an unset provider behaves
/// like a collaborator that cannot resolve the caller.
pub struct NullIdentity {
    current: Mutex<Option<ParticipantId>>,
}

impl NullIdentity {
    pub fn new(participant: impl Into<ParticipantId>) -> Self {
        Self {
            current: Mutex::new(Some(participant.into())),
        }
    }

    /// A provider that always fails to resolve the caller.
    pub fn unavailable() -> Self {
        Self {
            current: Mutex::new(None),
        }
    }

    /// Switch the caller for subsequent operations.
    pub fn set(&self, participant: impl Into<ParticipantId>) {
        *self.current.lock().unwrap() = Some(participant.into());
    }

    pub fn clear(&self) {
        *self.current.lock().unwrap() = None;
    }
}

impl IdentityProvider for NullIdentity {
    fn current_caller(&self) -> Result<ParticipantId, IdentityError> {
        self.current
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| IdentityError::Unavailable("no caller set".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_clear() {
        let identity = NullIdentity::new("insurer1");
        assert_eq!(identity.current_caller().unwrap().as_str(), "insurer1");
        identity.set("reinsurer1");
        assert_eq!(identity.current_caller().unwrap().as_str(), "reinsurer1");
        identity.clear();
        assert!(identity.current_caller().is_err());
    }

    #[test]
    fn test_unavailable() {
        assert!(NullIdentity::unavailable().current_caller().is_err());
    }
}
