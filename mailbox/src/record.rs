//! Mailbox record and its section entries.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use accord_types::{AssetId, ParticipantId, Timestamp};
use serde::{Deserialize, Serialize};

// ── Entries ─────────────────────────────────────────────────────────────────

/// A request this participant submitted (also used for finalized contracts).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionEntry {
    pub requestees: BTreeSet<ParticipantId>,
    pub created: Timestamp,
    pub updated: Timestamp,
}

/// A request addressed to this participant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestEntry {
    pub requestor: ParticipantId,
    pub created: Timestamp,
    pub updated: Timestamp,
}

/// A live proposal this participant is party to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalEntry {
    pub submission_id: AssetId,
    /// Who opened the proposal; counters never change it.
    pub bidder: ParticipantId,
    pub created: Timestamp,
    pub updated: Timestamp,
    pub updated_by: ParticipantId,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptedEntry {
    pub submission_id: AssetId,
    pub accepted: Timestamp,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedEntry {
    pub submission_ids: BTreeSet<AssetId>,
    pub proposal_ids: BTreeSet<AssetId>,
    pub rejected: Timestamp,
}

// ── Sections ────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Section {
    Submissions,
    Requests,
    Proposals,
    Accepted,
    Rejected,
    Contracts,
}

impl Section {
    pub const ALL: [Section; 6] = [
        Section::Submissions,
        Section::Requests,
        Section::Proposals,
        Section::Accepted,
        Section::Rejected,
        Section::Contracts,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Section::Submissions => "submissions",
            Section::Requests => "requests",
            Section::Proposals => "proposals",
            Section::Accepted => "accepted",
            Section::Rejected => "rejected",
            Section::Contracts => "contracts",
        }
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One keyed entry destined for a specific section.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MailboxEntry {
    Submission(AssetId, SubmissionEntry),
    Request(AssetId, RequestEntry),
    Proposal(AssetId, ProposalEntry),
    Accepted(AssetId, AcceptedEntry),
    Rejected(AssetId, RejectedEntry),
    Contract(AssetId, SubmissionEntry),
}

impl MailboxEntry {
    pub fn section(&self) -> Section {
        match self {
            MailboxEntry::Submission(..) => Section::Submissions,
            MailboxEntry::Request(..) => Section::Requests,
            MailboxEntry::Proposal(..) => Section::Proposals,
            MailboxEntry::Accepted(..) => Section::Accepted,
            MailboxEntry::Rejected(..) => Section::Rejected,
            MailboxEntry::Contract(..) => Section::Contracts,
        }
    }

    pub fn id(&self) -> &AssetId {
        match self {
            MailboxEntry::Submission(id, _)
            | MailboxEntry::Request(id, _)
            | MailboxEntry::Proposal(id, _)
            | MailboxEntry::Accepted(id, _)
            | MailboxEntry::Rejected(id, _)
            | MailboxEntry::Contract(id, _) => id,
        }
    }
}

// ── Record ──────────────────────────────────────────────────────────────────

/// Everything one participant has submitted, received, proposed or settled.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailboxRecord {
    pub submissions: BTreeMap<AssetId, SubmissionEntry>,
    pub requests: BTreeMap<AssetId, RequestEntry>,
    pub proposals: BTreeMap<AssetId, ProposalEntry>,
    pub accepted: BTreeMap<AssetId, AcceptedEntry>,
    pub rejected: BTreeMap<AssetId, RejectedEntry>,
    pub contracts: BTreeMap<AssetId, SubmissionEntry>,
}

impl MailboxRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write `entry` into its section, overwriting any entry with the same id.
    /// Returns `true` if the record changed.
    pub fn apply(&mut self, entry: MailboxEntry) -> bool {
        fn put<V: PartialEq>(map: &mut BTreeMap<AssetId, V>, id: AssetId, value: V) -> bool {
            if map.get(&id) == Some(&value) {
                return false;
            }
            map.insert(id, value);
            true
        }
        match entry {
            MailboxEntry::Submission(id, e) => put(&mut self.submissions, id, e),
            MailboxEntry::Request(id, e) => put(&mut self.requests, id, e),
            MailboxEntry::Proposal(id, e) => put(&mut self.proposals, id, e),
            MailboxEntry::Accepted(id, e) => put(&mut self.accepted, id, e),
            MailboxEntry::Rejected(id, e) => put(&mut self.rejected, id, e),
            MailboxEntry::Contract(id, e) => put(&mut self.contracts, id, e),
        }
    }

    /// Remove `id` from `section`. Returns `true` if it was present.
    pub fn remove(&mut self, section: Section, id: &AssetId) -> bool {
        match section {
            Section::Submissions => self.submissions.remove(id).is_some(),
            Section::Requests => self.requests.remove(id).is_some(),
            Section::Proposals => self.proposals.remove(id).is_some(),
            Section::Accepted => self.accepted.remove(id).is_some(),
            Section::Rejected => self.rejected.remove(id).is_some(),
            Section::Contracts => self.contracts.remove(id).is_some(),
        }
    }

    pub fn contains(&self, section: Section, id: &AssetId) -> bool {
        match section {
            Section::Submissions => self.submissions.contains_key(id),
            Section::Requests => self.requests.contains_key(id),
            Section::Proposals => self.proposals.contains_key(id),
            Section::Accepted => self.accepted.contains_key(id),
            Section::Rejected => self.rejected.contains_key(id),
            Section::Contracts => self.contracts.contains_key(id),
        }
    }

    pub fn is_empty(&self) -> bool {
        Section::ALL
            .iter()
            .all(|section| self.len(*section) == 0)
    }

    pub fn len(&self, section: Section) -> usize {
        match section {
            Section::Submissions => self.submissions.len(),
            Section::Requests => self.requests.len(),
            Section::Proposals => self.proposals.len(),
            Section::Accepted => self.accepted.len(),
            Section::Rejected => self.rejected.len(),
            Section::Contracts => self.contracts.len(),
        }
    }
}
