//! Caller identity for the duration of one command.
//!
//! The trusted front end names the caller in the `x-accord-participant`
//! header. The handler binds it to a task-local for the command's lifetime
//! so that collaborators holding a [`RequestIdentity`] (the remote rights
//! client in particular) resolve the same caller without threading it
//! through every call.

use std::future::Future;

use accord_types::{IdentityError, IdentityProvider, ParticipantId};

/// Header carrying the caller's participant id.
pub const PARTICIPANT_HEADER: &str = "x-accord-participant";

tokio::task_local! {
    static CURRENT_CALLER: ParticipantId;
}

/// Run `fut` with `caller` as the current caller.
pub async fn with_caller<F: Future>(caller: ParticipantId, fut: F) -> F::Output {
    CURRENT_CALLER.scope(caller, fut).await
}

/// [`IdentityProvider`] that reads the caller bound by [`with_caller`].
#[derive(Clone, Copy, Debug, Default)]
pub struct RequestIdentity;

impl IdentityProvider for RequestIdentity {
    fn current_caller(&self) -> Result<ParticipantId, IdentityError> {
        CURRENT_CALLER
            .try_with(ParticipantId::clone)
            .map_err(|_| IdentityError::Unavailable("no caller bound to this request".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_caller_visible_inside_scope() {
        let seen = with_caller(ParticipantId::new("u1"), async {
            RequestIdentity.current_caller()
        })
        .await;
        assert_eq!(seen.unwrap(), ParticipantId::new("u1"));
    }

    #[tokio::test]
    async fn test_no_caller_outside_scope() {
        assert!(matches!(
            RequestIdentity.current_caller(),
            Err(IdentityError::Unavailable(_))
        ));
    }
}
