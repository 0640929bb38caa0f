//! Mailbox Store: one record per participant listing what they submitted,
//! were asked for, proposed, and settled.
//!
//! Records live in the `Mailboxes` table, keyed by participant id, and are
//! written as one unit. Writers to the same participant are serialized
//! in-process; see [`MailboxStore::update`].

pub mod error;
pub mod record;
pub mod store;

pub use error::MailboxError;
pub use record::{
    AcceptedEntry, MailboxEntry, MailboxRecord, ProposalEntry, RejectedEntry, RequestEntry,
    Section, SubmissionEntry,
};
pub use store::{MailboxStore, MAILBOX_TABLE};
