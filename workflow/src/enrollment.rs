//! Participant contact details, recorded at enrollment.
//!
//! Stored at `enrollment/<participant>`. Request events look contacts up
//! here so requestees can be reached outside the mailbox.

use accord_store::codec::{decode, encode};
use accord_store::{KeyedLocks, LedgerKv, StoreError};
use accord_types::{ParticipantId, Timestamp};
use serde::{Deserialize, Serialize};

const ENROLLMENT_PREFIX: &str = "enrollment/";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enrollment {
    pub participant: ParticipantId,
    pub contact: String,
    pub enrolled: Timestamp,
    pub updated: Timestamp,
}

pub struct EnrollmentStore<S> {
    kv: S,
    locks: KeyedLocks,
}

impl<S: LedgerKv> EnrollmentStore<S> {
    pub fn new(kv: S) -> Self {
        Self {
            kv,
            locks: KeyedLocks::new(),
        }
    }

    /// Record or replace the participant's contact. Re-enrolling keeps the
    /// first enrollment time.
    pub fn enroll(
        &self,
        participant: &ParticipantId,
        contact: &str,
        at: Timestamp,
    ) -> Result<Enrollment, StoreError> {
        let key = enrollment_key(participant);
        self.locks.with_lock(&key, || {
            let enrolled = self.load(&key)?.map_or(at, |existing| existing.enrolled);
            let enrollment = Enrollment {
                participant: participant.clone(),
                contact: contact.to_string(),
                enrolled,
                updated: at,
            };
            self.kv.put(&key, &encode(&enrollment)?)?;
            Ok(enrollment)
        })
    }

    pub fn enrollment(&self, participant: &ParticipantId) -> Result<Option<Enrollment>, StoreError> {
        self.load(&enrollment_key(participant))
    }

    pub fn contact(&self, participant: &ParticipantId) -> Result<Option<String>, StoreError> {
        Ok(self.enrollment(participant)?.map(|e| e.contact))
    }

    fn load(&self, key: &str) -> Result<Option<Enrollment>, StoreError> {
        match self.kv.get(key)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }
}

fn enrollment_key(participant: &ParticipantId) -> String {
    format!("{ENROLLMENT_PREFIX}{participant}")
}
