//! Request notifications.
//!
//! Every request whose fan-out completes is published on a broadcast
//! channel, addressed to its requestees with whatever contact they enrolled.
//! Delivery is best effort: with no subscriber the event is dropped, and a
//! slow subscriber that falls behind the channel capacity loses the oldest
//! events.

use accord_types::{AssetId, ParticipantId, Timestamp};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

pub const DEFAULT_EVENT_CAPACITY: usize = 256;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub participant: ParticipantId,
    pub contact: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestEvent {
    pub request_id: AssetId,
    pub requestor: ParticipantId,
    pub requestor_contact: Option<String>,
    pub recipients: Vec<Recipient>,
    pub created: Timestamp,
}

impl RequestEvent {
    /// Whether `participant` is the requestor or one of the recipients.
    pub fn concerns(&self, participant: &ParticipantId) -> bool {
        &self.requestor == participant
            || self
                .recipients
                .iter()
                .any(|r| &r.participant == participant)
    }
}

pub struct EventFeed {
    tx: broadcast::Sender<RequestEvent>,
}

impl EventFeed {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RequestEvent> {
        self.tx.subscribe()
    }

    /// Number of subscribers the event reached.
    pub fn publish(&self, event: RequestEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }
}

impl Default for EventFeed {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
