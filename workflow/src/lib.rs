//! Negotiation workflow: durable id sequences, request and proposal
//! documents, participant enrollment, request events, and the coordinator
//! that drives a request through proposals, counter-proposals and a final
//! accept or reject.

pub mod coordinator;
pub mod documents;
pub mod enrollment;
pub mod error;
pub mod events;
pub mod retry;
pub mod sequence;

pub use coordinator::{
    is_reserved_id, Coordinator, SharedLedger, PROPOSAL_PREFIX, REQUEST_PREFIX,
};
pub use documents::{
    DocumentStore, ProposalDocument, ProposalStatus, RequestDocument, RequestStatus,
};
pub use enrollment::{Enrollment, EnrollmentStore};
pub use error::WorkflowError;
pub use events::{EventFeed, Recipient, RequestEvent, DEFAULT_EVENT_CAPACITY};
pub use retry::RetryPolicy;
pub use sequence::SequenceGenerator;
