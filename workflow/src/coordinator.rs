//! The negotiation state machine.
//!
//! A thread starts with a request (`OPEN`), collects proposals from the
//! requestees, bounces counter-proposals between the two parties of each
//! proposal, and ends when the requestor accepts one proposal. Accepting
//! closes the request: the other live proposals on it are rejected and no
//! new proposal or counter is taken.
//!
//! Every operation is a fan-out of independent writes: rights grants,
//! mailbox saves and documents. Nothing is rolled back. A failed fan-out is
//! left partially applied and every write is idempotent, so re-running the
//! same operation completes it. The `*_with_retry` variants do that
//! automatically for transport failures.
//!
//! Ids are claimed before anything else is written. A claim is atomic in the
//! rights registry, so a request or proposal never inherits grants that
//! someone else made on its id.

use std::collections::BTreeSet;
use std::sync::Arc;

use accord_mailbox::{
    AcceptedEntry, MailboxEntry, MailboxRecord, MailboxStore, ProposalEntry, RejectedEntry,
    RequestEntry, Section, SubmissionEntry,
};
use accord_rights::RightsAuthority;
use accord_store::{KvTables, LedgerKv, StoreError};
use accord_types::{AssetId, ParticipantId, Right, RightSet, Timestamp};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use crate::documents::{
    DocumentStore, ProposalDocument, ProposalStatus, RequestDocument, RequestStatus,
};
use crate::enrollment::{Enrollment, EnrollmentStore};
use crate::error::WorkflowError;
use crate::events::{EventFeed, Recipient, RequestEvent};
use crate::retry::RetryPolicy;
use crate::sequence::SequenceGenerator;

pub const REQUEST_PREFIX: &str = "REQ";
pub const PROPOSAL_PREFIX: &str = "PROP";

/// Consecutive taken ids tolerated before allocation gives up.
const MAX_ID_ATTEMPTS: usize = 8;

pub type SharedLedger = Arc<dyn LedgerKv>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Outcome {
    Accepted,
    Rejected,
}

impl Outcome {
    fn status(self) -> ProposalStatus {
        match self {
            Outcome::Accepted => ProposalStatus::Accepted,
            Outcome::Rejected => ProposalStatus::Rejected,
        }
    }
}

/// Whether `id` looks like one the coordinator generates (`REQ-…`,
/// `PROP-…`). Such ids are never accepted from callers.
pub fn is_reserved_id(id: &AssetId) -> bool {
    [REQUEST_PREFIX, PROPOSAL_PREFIX].iter().any(|prefix| {
        id.as_str()
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('-'))
    })
}

fn requestor_rights() -> RightSet {
    RightSet::from([Right::Owner, Right::Viewer])
}

fn bidder_rights() -> RightSet {
    RightSet::from([Right::Owner, Right::Viewer, Right::Updater])
}

fn approver_rights() -> RightSet {
    RightSet::from([Right::Viewer, Right::Approval, Right::Updater])
}

/// The two parties of one proposal.
struct ProposalThread {
    id: AssetId,
    submission_id: AssetId,
    requestor: ParticipantId,
    bidder: ParticipantId,
}

pub struct Coordinator {
    rights: Arc<dyn RightsAuthority>,
    mailboxes: MailboxStore<KvTables<SharedLedger>>,
    sequence: SequenceGenerator<SharedLedger>,
    documents: DocumentStore<SharedLedger>,
    enrollment: EnrollmentStore<SharedLedger>,
    events: EventFeed,
    /// Held while an accept checks and closes its request.
    closing: Mutex<()>,
    retry: RetryPolicy,
}

impl Coordinator {
    pub fn new(ledger: SharedLedger, rights: Arc<dyn RightsAuthority>) -> Result<Self, WorkflowError> {
        Ok(Self {
            rights,
            mailboxes: MailboxStore::open(KvTables::new(Arc::clone(&ledger)))?,
            sequence: SequenceGenerator::new(Arc::clone(&ledger)),
            documents: DocumentStore::new(Arc::clone(&ledger)),
            enrollment: EnrollmentStore::new(ledger),
            events: EventFeed::default(),
            closing: Mutex::new(()),
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.events = EventFeed::new(capacity);
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    pub fn rights(&self) -> &Arc<dyn RightsAuthority> {
        &self.rights
    }

    /// Request events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<RequestEvent> {
        self.events.subscribe()
    }

    // ── Enrollment ──────────────────────────────────────────────────────────

    /// Record how `participant` can be reached. Replaces an earlier contact.
    pub fn enroll(
        &self,
        participant: &ParticipantId,
        contact: &str,
        at: Timestamp,
    ) -> Result<Enrollment, WorkflowError> {
        let contact = contact.trim();
        if contact.is_empty() {
            return Err(WorkflowError::InvalidInput(format!(
                "empty contact for {participant}"
            )));
        }
        let enrollment = self.enrollment.enroll(participant, contact, at)?;
        info!(%participant, "participant enrolled");
        Ok(enrollment)
    }

    pub fn enrollment(
        &self,
        participant: &ParticipantId,
    ) -> Result<Option<Enrollment>, WorkflowError> {
        Ok(self.enrollment.enrollment(participant)?)
    }

    // ── Requests ────────────────────────────────────────────────────────────

    /// Open a negotiation under a caller-chosen id.
    ///
    /// Claims the id for the requestor with `{owner, viewer}`, records the
    /// submission in the requestor's mailbox, then grants each requestee
    /// `{viewer}` and records the request in their mailbox.
    pub async fn submit_request(
        &self,
        request_id: &AssetId,
        requestor: &ParticipantId,
        requestees: &[ParticipantId],
        created: Timestamp,
    ) -> Result<AssetId, WorkflowError> {
        if is_reserved_id(request_id) {
            return Err(WorkflowError::ReservedId(request_id.clone()));
        }
        self.open_request(request_id, requestor, requestees, created)
            .await
    }

    /// Re-run the fan-out of a request the caller already owns.
    pub async fn resume_request(
        &self,
        request_id: &AssetId,
        requestor: &ParticipantId,
        requestees: &[ParticipantId],
        created: Timestamp,
    ) -> Result<AssetId, WorkflowError> {
        let requestees = validate_requestees(requestor, requestees)?;
        self.require(request_id, requestor, &RightSet::from([Right::Owner]))
            .await?;
        self.fan_out_request(request_id, requestor, &requestees, created)
            .await?;
        self.announce_request(request_id, requestor, &requestees, created)?;
        info!(%request_id, %requestor, "request fan-out resumed");
        Ok(request_id.clone())
    }

    /// [`Self::submit_request`], resuming the fan-out after retryable failures.
    pub async fn submit_request_with_retry(
        &self,
        request_id: &AssetId,
        requestor: &ParticipantId,
        requestees: &[ParticipantId],
        created: Timestamp,
    ) -> Result<AssetId, WorkflowError> {
        if is_reserved_id(request_id) {
            return Err(WorkflowError::ReservedId(request_id.clone()));
        }
        self.retry
            .run("submit_request", move |attempt| {
                self.open_or_resume(request_id, requestor, requestees, created, attempt)
            })
            .await
    }

    /// Allocate a `REQ-<n>` id, store the request body, and submit it.
    ///
    /// The body is written only once the id is ours.
    pub async fn submit_request_document(
        &self,
        requestor: &ParticipantId,
        requestees: &[ParticipantId],
        terms: &str,
        created: Timestamp,
    ) -> Result<AssetId, WorkflowError> {
        let requestee_set = &validate_requestees(requestor, requestees)?;
        let id = &self
            .claim_fresh(
                || self.sequence.next(REQUEST_PREFIX),
                requestor,
                &requestor_rights(),
                self.retry,
            )
            .await?;
        self.documents.put_request(&RequestDocument {
            id: id.clone(),
            requestor: requestor.clone(),
            requestees: requestee_set.clone(),
            terms: terms.to_string(),
            status: RequestStatus::Open,
            created,
            updated: created,
        })?;
        self.retry
            .run("submit_request", move |_| {
                self.fan_out_request(id, requestor, requestee_set, created)
            })
            .await?;
        self.announce_request(id, requestor, requestee_set, created)?;
        info!(request_id = %id, %requestor, requestees = requestee_set.len(), "request submitted");
        Ok(id.clone())
    }

    async fn open_request(
        &self,
        request_id: &AssetId,
        requestor: &ParticipantId,
        requestees: &[ParticipantId],
        created: Timestamp,
    ) -> Result<AssetId, WorkflowError> {
        let requestees = validate_requestees(requestor, requestees)?;
        if !self
            .rights
            .claim_asset(request_id, requestor, &requestor_rights())
            .await?
        {
            return Err(WorkflowError::AlreadyExists(request_id.clone()));
        }
        self.fan_out_request(request_id, requestor, &requestees, created)
            .await?;
        self.announce_request(request_id, requestor, &requestees, created)?;
        info!(%request_id, %requestor, requestees = requestees.len(), "request submitted");
        Ok(request_id.clone())
    }

    async fn open_or_resume(
        &self,
        request_id: &AssetId,
        requestor: &ParticipantId,
        requestees: &[ParticipantId],
        created: Timestamp,
        attempt: u32,
    ) -> Result<AssetId, WorkflowError> {
        // After a partial first attempt the asset exists and is ours.
        if attempt > 0 && self.holds(request_id, requestor, Right::Owner).await? {
            self.resume_request(request_id, requestor, requestees, created)
                .await
        } else {
            self.open_request(request_id, requestor, requestees, created)
                .await
        }
    }

    /// Everything after the claim. The requestor already holds `{owner, viewer}`.
    async fn fan_out_request(
        &self,
        request_id: &AssetId,
        requestor: &ParticipantId,
        requestees: &BTreeSet<ParticipantId>,
        created: Timestamp,
    ) -> Result<(), WorkflowError> {
        self.mailboxes.put_entry(
            requestor,
            MailboxEntry::Submission(
                request_id.clone(),
                SubmissionEntry {
                    requestees: requestees.clone(),
                    created,
                    updated: created,
                },
            ),
        )?;
        for requestee in requestees {
            self.rights
                .grant_rights(request_id, requestee, &RightSet::from([Right::Viewer]))
                .await?;
            self.mailboxes.put_entry(
                requestee,
                MailboxEntry::Request(
                    request_id.clone(),
                    RequestEntry {
                        requestor: requestor.clone(),
                        created,
                        updated: created,
                    },
                ),
            )?;
            debug!(%request_id, %requestee, "requestee notified");
        }
        Ok(())
    }

    fn announce_request(
        &self,
        request_id: &AssetId,
        requestor: &ParticipantId,
        requestees: &BTreeSet<ParticipantId>,
        created: Timestamp,
    ) -> Result<(), WorkflowError> {
        let recipients = requestees
            .iter()
            .map(|participant| {
                Ok(Recipient {
                    participant: participant.clone(),
                    contact: self.enrollment.contact(participant)?,
                })
            })
            .collect::<Result<Vec<_>, StoreError>>()?;
        let delivered = self.events.publish(RequestEvent {
            request_id: request_id.clone(),
            requestor: requestor.clone(),
            requestor_contact: self.enrollment.contact(requestor)?,
            recipients,
            created,
        });
        debug!(%request_id, delivered, "request event published");
        Ok(())
    }

    // ── Proposals ───────────────────────────────────────────────────────────

    /// Bid on a request the bidder was asked for. Returns the proposal id.
    pub async fn submit_proposal(
        &self,
        request_id: &AssetId,
        bidder: &ParticipantId,
        created: Timestamp,
    ) -> Result<AssetId, WorkflowError> {
        self.propose(request_id, bidder, None, created, RetryPolicy::once())
            .await
    }

    /// [`Self::submit_proposal`] that also stores the proposal body.
    pub async fn submit_proposal_with_terms(
        &self,
        request_id: &AssetId,
        bidder: &ParticipantId,
        terms: &str,
        created: Timestamp,
    ) -> Result<AssetId, WorkflowError> {
        self.propose(request_id, bidder, Some(terms), created, RetryPolicy::once())
            .await
    }

    /// Submit a proposal, retrying the checks, the id claim and then the
    /// fan-out on retryable failures. The proposal id is claimed once and
    /// reused.
    pub async fn submit_proposal_with_retry(
        &self,
        request_id: &AssetId,
        bidder: &ParticipantId,
        terms: Option<&str>,
        created: Timestamp,
    ) -> Result<AssetId, WorkflowError> {
        self.propose(request_id, bidder, terms, created, self.retry)
            .await
    }

    async fn propose(
        &self,
        request_id: &AssetId,
        bidder: &ParticipantId,
        terms: Option<&str>,
        created: Timestamp,
        policy: RetryPolicy,
    ) -> Result<AssetId, WorkflowError> {
        let requestor = policy
            .run("submit_proposal", move |_| {
                self.prepare_proposal(request_id, bidder)
            })
            .await?;
        let id = self
            .claim_fresh(
                || self.sequence.next_with(PROPOSAL_PREFIX, request_id.as_str()),
                bidder,
                &bidder_rights(),
                policy,
            )
            .await?;
        let thread = &ProposalThread {
            id,
            submission_id: request_id.clone(),
            requestor,
            bidder: bidder.clone(),
        };
        policy
            .run("submit_proposal", move |_| {
                self.fan_out_proposal(thread, terms, created)
            })
            .await?;
        info!(
            proposal_id = %thread.id,
            %request_id,
            %bidder,
            requestor = %thread.requestor,
            "proposal submitted"
        );
        Ok(thread.id.clone())
    }

    /// Check the bidder may see the request, find who asked them, and make
    /// sure the request is still open.
    async fn prepare_proposal(
        &self,
        request_id: &AssetId,
        bidder: &ParticipantId,
    ) -> Result<ParticipantId, WorkflowError> {
        self.require(request_id, bidder, &RightSet::from([Right::Viewer]))
            .await?;
        let requestor = self
            .stored_mailbox(bidder)?
            .requests
            .get(request_id)
            .map(|entry| entry.requestor.clone())
            .ok_or_else(|| {
                WorkflowError::IllegalState(format!(
                    "{bidder} has no request {request_id} in their mailbox"
                ))
            })?;
        self.ensure_open(&requestor, request_id)?;
        Ok(requestor)
    }

    /// Everything after the claim. The bidder already holds its rights.
    async fn fan_out_proposal(
        &self,
        thread: &ProposalThread,
        terms: Option<&str>,
        created: Timestamp,
    ) -> Result<(), WorkflowError> {
        let entry = ProposalEntry {
            submission_id: thread.submission_id.clone(),
            bidder: thread.bidder.clone(),
            created,
            updated: created,
            updated_by: thread.bidder.clone(),
        };
        self.mailboxes.put_entry(
            &thread.bidder,
            MailboxEntry::Proposal(thread.id.clone(), entry.clone()),
        )?;
        self.mailboxes.put_entry(
            &thread.requestor,
            MailboxEntry::Proposal(thread.id.clone(), entry),
        )?;
        self.rights
            .grant_rights(&thread.id, &thread.requestor, &approver_rights())
            .await?;
        if let Some(terms) = terms {
            self.documents.put_proposal(&ProposalDocument {
                id: thread.id.clone(),
                submission_id: thread.submission_id.clone(),
                requestor: thread.requestor.clone(),
                bidder: thread.bidder.clone(),
                terms: terms.to_string(),
                status: ProposalStatus::Bid,
                created,
                updated: created,
                updated_by: thread.bidder.clone(),
            })?;
        }
        Ok(())
    }

    // ── Counter-proposals ───────────────────────────────────────────────────

    /// Mark the proposal as last updated by `updater` in both parties'
    /// mailboxes.
    pub async fn counter_propose(
        &self,
        proposal_id: &AssetId,
        updater: &ParticipantId,
        updated_at: Timestamp,
    ) -> Result<(), WorkflowError> {
        self.counter(proposal_id, updater, None, updated_at).await
    }

    /// [`Self::counter_propose`] that also replaces the proposal terms.
    pub async fn counter_propose_with_terms(
        &self,
        proposal_id: &AssetId,
        updater: &ParticipantId,
        terms: &str,
        updated_at: Timestamp,
    ) -> Result<(), WorkflowError> {
        self.counter(proposal_id, updater, Some(terms), updated_at)
            .await
    }

    async fn counter(
        &self,
        proposal_id: &AssetId,
        updater: &ParticipantId,
        terms: Option<&str>,
        updated_at: Timestamp,
    ) -> Result<(), WorkflowError> {
        let entry = self
            .stored_mailbox(updater)?
            .proposals
            .get(proposal_id)
            .cloned()
            .ok_or_else(|| {
                WorkflowError::NotFound(format!("proposal {proposal_id} for {updater}"))
            })?;
        self.require(proposal_id, updater, &RightSet::from([Right::Updater]))
            .await?;

        // Pairing assumes exactly two parties per proposal.
        let holders = self.rights.holders(proposal_id).await?;
        let others: Vec<&(ParticipantId, RightSet)> =
            holders.iter().filter(|(p, _)| p != updater).collect();
        let other = match others.as_slice() {
            [(p, _)] => p.clone(),
            _ => {
                return Err(WorkflowError::IllegalState(format!(
                    "proposal {proposal_id} has {} counterparties for {updater}, expected one",
                    others.len()
                )))
            }
        };
        let requestor = if &entry.bidder == updater {
            other.clone()
        } else {
            updater.clone()
        };
        self.ensure_open(&requestor, &entry.submission_id)?;

        let updated = ProposalEntry {
            updated: updated_at,
            updated_by: updater.clone(),
            ..entry
        };
        self.mailboxes.put_entry(
            updater,
            MailboxEntry::Proposal(proposal_id.clone(), updated.clone()),
        )?;
        self.mailboxes.put_entry(
            &other,
            MailboxEntry::Proposal(proposal_id.clone(), updated.clone()),
        )?;

        let found = self.documents.update_proposal(proposal_id, |doc| {
            doc.status = ProposalStatus::Counter;
            doc.updated = updated_at;
            doc.updated_by = updater.clone();
            if let Some(terms) = terms {
                doc.terms = terms.to_string();
            }
        })?;
        if !found {
            if let Some(terms) = terms {
                self.documents.put_proposal(&ProposalDocument {
                    id: proposal_id.clone(),
                    submission_id: updated.submission_id.clone(),
                    requestor,
                    bidder: updated.bidder.clone(),
                    terms: terms.to_string(),
                    status: ProposalStatus::Counter,
                    created: updated.created,
                    updated: updated_at,
                    updated_by: updater.clone(),
                })?;
            }
        }

        info!(%proposal_id, %updater, counterparty = %other, "proposal countered");
        Ok(())
    }

    // ── Accept / reject ─────────────────────────────────────────────────────

    /// Accept a proposal and close its request.
    ///
    /// Only one proposal per request can be accepted. Every other proposal
    /// still live on the request is rejected for all of its parties.
    pub async fn accept(
        &self,
        proposal_id: &AssetId,
        approver: &ParticipantId,
        accepted_at: Timestamp,
    ) -> Result<(), WorkflowError> {
        self.require(proposal_id, approver, &RightSet::from([Right::Approval]))
            .await?;
        let _closing = self.closing.lock().await;
        let mailbox = self.stored_mailbox(approver)?;
        let submission_id = finalization_target(&mailbox, proposal_id, Outcome::Accepted)?;
        if let Some(contract) = contract_on(&mailbox, &submission_id) {
            if contract != proposal_id {
                return Err(WorkflowError::IllegalState(format!(
                    "request {submission_id} is already contracted through {contract}"
                )));
            }
        }

        self.settle_parties(proposal_id, &submission_id, approver, accepted_at, Outcome::Accepted)
            .await?;

        let siblings: Vec<AssetId> = self
            .stored_mailbox(approver)?
            .proposals
            .iter()
            .filter(|(_, entry)| entry.submission_id == submission_id)
            .map(|(id, _)| id.clone())
            .collect();
        for sibling in &siblings {
            self.settle_parties(sibling, &submission_id, approver, accepted_at, Outcome::Rejected)
                .await?;
        }
        self.documents.update_request(&submission_id, |doc| {
            doc.status = RequestStatus::Contracted;
            doc.updated = accepted_at;
        })?;

        info!(
            %proposal_id,
            %submission_id,
            %approver,
            closed = siblings.len(),
            "proposal accepted"
        );
        Ok(())
    }

    pub async fn reject(
        &self,
        proposal_id: &AssetId,
        approver: &ParticipantId,
        rejected_at: Timestamp,
    ) -> Result<(), WorkflowError> {
        self.require(proposal_id, approver, &RightSet::from([Right::Approval]))
            .await?;
        let submission_id = finalization_target(
            &self.stored_mailbox(approver)?,
            proposal_id,
            Outcome::Rejected,
        )?;
        self.settle_parties(proposal_id, &submission_id, approver, rejected_at, Outcome::Rejected)
            .await?;
        info!(%proposal_id, %submission_id, %approver, "proposal rejected");
        Ok(())
    }

    /// Move the proposal out of every party's Proposals section into
    /// Accepted or Rejected and mark its document. Rights are left as they
    /// are.
    async fn settle_parties(
        &self,
        proposal_id: &AssetId,
        submission_id: &AssetId,
        approver: &ParticipantId,
        at: Timestamp,
        outcome: Outcome,
    ) -> Result<(), WorkflowError> {
        let parties: BTreeSet<ParticipantId> = self
            .rights
            .holders(proposal_id)
            .await?
            .into_iter()
            .map(|(p, _)| p)
            .collect();
        // The approver goes last: once its mailbox shows the outcome, every
        // other party's does too.
        for party in parties
            .iter()
            .filter(|p| *p != approver)
            .chain(std::iter::once(approver))
        {
            self.mailboxes.update(party, |record| {
                settle(record, proposal_id, submission_id, &parties, at, outcome)
            })?;
        }
        self.documents.update_proposal(proposal_id, |doc| {
            if !doc.status.is_final() {
                doc.status = outcome.status();
                doc.updated = at;
                doc.updated_by = approver.clone();
            }
        })?;
        debug!(%proposal_id, ?outcome, parties = parties.len(), "proposal settled");
        Ok(())
    }

    // ── Reads ───────────────────────────────────────────────────────────────

    /// The participant's mailbox, created empty on first reference.
    pub fn mailbox(&self, participant: &ParticipantId) -> Result<MailboxRecord, WorkflowError> {
        Ok(self.mailboxes.get_or_create_mailbox(participant)?)
    }

    pub async fn request_document(
        &self,
        request_id: &AssetId,
        caller: &ParticipantId,
    ) -> Result<RequestDocument, WorkflowError> {
        self.require_existing(request_id, caller, Right::Viewer)
            .await?;
        self.documents
            .request(request_id)?
            .ok_or_else(|| WorkflowError::NotFound(format!("request document {request_id}")))
    }

    pub async fn proposal_document(
        &self,
        proposal_id: &AssetId,
        caller: &ParticipantId,
    ) -> Result<ProposalDocument, WorkflowError> {
        self.require_existing(proposal_id, caller, Right::Viewer)
            .await?;
        self.documents
            .proposal(proposal_id)?
            .ok_or_else(|| WorkflowError::NotFound(format!("proposal document {proposal_id}")))
    }

    // ── Helpers ─────────────────────────────────────────────────────────────

    /// Allocate ids until one can be claimed for `claimant`.
    async fn claim_fresh(
        &self,
        mut allocate: impl FnMut() -> Result<AssetId, StoreError>,
        claimant: &ParticipantId,
        rights: &RightSet,
        policy: RetryPolicy,
    ) -> Result<AssetId, WorkflowError> {
        for _ in 0..MAX_ID_ATTEMPTS {
            let id = allocate()?;
            let candidate = &id;
            let claimed = policy
                .run("claim_id", move |attempt| {
                    self.try_claim(candidate, claimant, rights, attempt)
                })
                .await?;
            if claimed {
                return Ok(id);
            }
            warn!(asset = %id, %claimant, "generated id already taken");
        }
        Err(WorkflowError::IllegalState(format!(
            "no free id for {claimant} after {MAX_ID_ATTEMPTS} attempts"
        )))
    }

    async fn try_claim(
        &self,
        asset: &AssetId,
        claimant: &ParticipantId,
        rights: &RightSet,
        attempt: u32,
    ) -> Result<bool, WorkflowError> {
        if self.rights.claim_asset(asset, claimant, rights).await? {
            return Ok(true);
        }
        // A claim that landed before its answer was lost leaves the
        // claimant as the only holder. Holders are only listed once the
        // claimant is known to hold the rights, so foreign assets stay opaque.
        if attempt == 0 || !self.rights.query_rights(asset, claimant).await?.covers(rights) {
            return Ok(false);
        }
        Ok(matches!(
            self.rights.holders(asset).await?.as_slice(),
            [(holder, _)] if holder == claimant
        ))
    }

    /// Fail if `requestor` already accepted a proposal on `submission_id`.
    fn ensure_open(
        &self,
        requestor: &ParticipantId,
        submission_id: &AssetId,
    ) -> Result<(), WorkflowError> {
        match contract_on(&self.stored_mailbox(requestor)?, submission_id) {
            Some(contract) => Err(WorkflowError::IllegalState(format!(
                "request {submission_id} is already contracted through {contract}"
            ))),
            None => Ok(()),
        }
    }

    async fn holds(
        &self,
        asset: &AssetId,
        participant: &ParticipantId,
        right: Right,
    ) -> Result<bool, WorkflowError> {
        Ok(self
            .rights
            .query_rights(asset, participant)
            .await?
            .contains(right))
    }

    async fn require(
        &self,
        asset: &AssetId,
        participant: &ParticipantId,
        required: &RightSet,
    ) -> Result<(), WorkflowError> {
        let held = self.rights.query_rights(asset, participant).await?;
        let missing: RightSet = held.missing(required).into_iter().collect();
        if missing.is_empty() {
            return Ok(());
        }
        Err(WorkflowError::Authorization {
            participant: participant.clone(),
            asset: asset.clone(),
            missing,
        })
    }

    /// Like [`Self::require`], but a missing asset is `NotFound`.
    async fn require_existing(
        &self,
        asset: &AssetId,
        participant: &ParticipantId,
        right: Right,
    ) -> Result<(), WorkflowError> {
        let response = self.rights.asset_rights(asset, participant).await?;
        if !response.exists {
            return Err(WorkflowError::NotFound(format!("asset {asset}")));
        }
        if !response.contains(right) {
            return Err(WorkflowError::Authorization {
                participant: participant.clone(),
                asset: asset.clone(),
                missing: RightSet::from([right]),
            });
        }
        Ok(())
    }

    /// Mailbox contents without creating one.
    fn stored_mailbox(&self, participant: &ParticipantId) -> Result<MailboxRecord, WorkflowError> {
        Ok(self
            .mailboxes
            .get_mailbox(participant)?
            .unwrap_or_default())
    }
}

fn validate_requestees(
    requestor: &ParticipantId,
    requestees: &[ParticipantId],
) -> Result<BTreeSet<ParticipantId>, WorkflowError> {
    if requestees.is_empty() {
        return Err(WorkflowError::IllegalState(
            "a request needs at least one requestee".to_string(),
        ));
    }
    if requestees.contains(requestor) {
        return Err(WorkflowError::IllegalState(format!(
            "{requestor} cannot be a requestee of their own request"
        )));
    }
    Ok(requestees.iter().cloned().collect())
}

/// The proposal through which the mailbox owner contracted `submission_id`.
fn contract_on<'a>(mailbox: &'a MailboxRecord, submission_id: &AssetId) -> Option<&'a AssetId> {
    mailbox
        .accepted
        .iter()
        .find(|(_, entry)| &entry.submission_id == submission_id)
        .map(|(id, _)| id)
}

/// The submission a proposal belongs to, read from the approver's mailbox.
///
/// A proposal already finalized with the same outcome is a replay; the
/// opposite outcome is refused.
fn finalization_target(
    mailbox: &MailboxRecord,
    proposal_id: &AssetId,
    outcome: Outcome,
) -> Result<AssetId, WorkflowError> {
    if let Some(entry) = mailbox.proposals.get(proposal_id) {
        return Ok(entry.submission_id.clone());
    }
    match (
        mailbox.accepted.get(proposal_id),
        mailbox.rejected.get(proposal_id),
        outcome,
    ) {
        (Some(accepted), _, Outcome::Accepted) => Ok(accepted.submission_id.clone()),
        (_, Some(rejected), Outcome::Rejected) => {
            rejected.submission_ids.iter().next().cloned().ok_or_else(|| {
                WorkflowError::IllegalState(format!(
                    "rejected proposal {proposal_id} has no submission"
                ))
            })
        }
        (Some(_), _, Outcome::Rejected) => Err(WorkflowError::IllegalState(format!(
            "proposal {proposal_id} was already accepted"
        ))),
        (_, Some(_), Outcome::Accepted) => Err(WorkflowError::IllegalState(format!(
            "proposal {proposal_id} was already rejected"
        ))),
        (None, None, _) => Err(WorkflowError::NotFound(format!("proposal {proposal_id}"))),
    }
}

fn settle(
    record: &mut MailboxRecord,
    proposal_id: &AssetId,
    submission_id: &AssetId,
    parties: &BTreeSet<ParticipantId>,
    at: Timestamp,
    outcome: Outcome,
) {
    record.remove(Section::Proposals, proposal_id);
    match outcome {
        Outcome::Accepted => {
            if !record.contains(Section::Accepted, proposal_id) {
                record.apply(MailboxEntry::Accepted(
                    proposal_id.clone(),
                    AcceptedEntry {
                        submission_id: submission_id.clone(),
                        accepted: at,
                    },
                ));
            }
            if !record.contains(Section::Contracts, proposal_id) {
                record.apply(MailboxEntry::Contract(
                    proposal_id.clone(),
                    SubmissionEntry {
                        requestees: parties.clone(),
                        created: at,
                        updated: at,
                    },
                ));
            }
        }
        Outcome::Rejected => {
            if !record.contains(Section::Rejected, proposal_id) {
                record.apply(MailboxEntry::Rejected(
                    proposal_id.clone(),
                    RejectedEntry {
                        submission_ids: BTreeSet::from([submission_id.clone()]),
                        proposal_ids: BTreeSet::from([proposal_id.clone()]),
                        rejected: at,
                    },
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use accord_nullables::NullLedger;
    use accord_rights::{AssetRightsResponse, AuthorityError, LocalRights, RightsRegistry};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    struct Harness {
        ledger: Arc<NullLedger>,
        coordinator: Coordinator,
    }

    fn harness() -> Harness {
        let ledger = Arc::new(NullLedger::new());
        let registry = Arc::new(RightsRegistry::new(Arc::clone(&ledger)));
        let coordinator = Coordinator::new(
            Arc::clone(&ledger) as SharedLedger,
            Arc::new(LocalRights::new(registry)),
        )
        .unwrap();
        Harness { ledger, coordinator }
    }

    fn p(id: &str) -> ParticipantId {
        ParticipantId::new(id)
    }

    fn a(id: &str) -> AssetId {
        AssetId::new(id)
    }

    fn t(secs: u64) -> Timestamp {
        Timestamp::new(secs)
    }

    async fn rights_of(c: &Coordinator, asset: &str, who: &str) -> RightSet {
        c.rights().query_rights(&a(asset), &p(who)).await.unwrap()
    }

    /// U1 asks U2 and U3; U2 bids.
    async fn opened_with_bid(c: &Coordinator) -> AssetId {
        c.submit_request(&a("R"), &p("u1"), &[p("u2"), p("u3")], t(100))
            .await
            .unwrap();
        c.submit_proposal(&a("R"), &p("u2"), t(200)).await.unwrap()
    }

    // ── submit_request ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_submit_request_grants_and_notifies() {
        let h = harness();
        let c = &h.coordinator;
        let id = c
            .submit_request(&a("R"), &p("u1"), &[p("u2"), p("u3")], t(100))
            .await
            .unwrap();
        assert_eq!(id, a("R"));
        assert_eq!(
            rights_of(c, "R", "u1").await,
            RightSet::from([Right::Owner, Right::Viewer])
        );
        assert_eq!(rights_of(c, "R", "u2").await, RightSet::from([Right::Viewer]));
        assert_eq!(rights_of(c, "R", "u3").await, RightSet::from([Right::Viewer]));

        let u1 = c.mailbox(&p("u1")).unwrap();
        assert_eq!(
            u1.submissions[&a("R")].requestees,
            BTreeSet::from([p("u2"), p("u3")])
        );
        for who in ["u2", "u3"] {
            let mailbox = c.mailbox(&p(who)).unwrap();
            assert_eq!(mailbox.requests[&a("R")].requestor, p("u1"));
            assert_eq!(mailbox.requests[&a("R")].created, t(100));
        }
    }

    #[tokio::test]
    async fn test_submit_request_twice_is_already_exists() {
        let h = harness();
        let c = &h.coordinator;
        c.submit_request(&a("R"), &p("u1"), &[p("u2")], t(1))
            .await
            .unwrap();
        assert!(matches!(
            c.submit_request(&a("R"), &p("u9"), &[p("u2")], t(2)).await,
            Err(WorkflowError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_submit_request_rejects_bad_requestees() {
        let h = harness();
        let c = &h.coordinator;
        assert!(matches!(
            c.submit_request(&a("R"), &p("u1"), &[], t(1)).await,
            Err(WorkflowError::IllegalState(_))
        ));
        assert!(matches!(
            c.submit_request(&a("R"), &p("u1"), &[p("u1")], t(1)).await,
            Err(WorkflowError::IllegalState(_))
        ));
        assert!(h.ledger.keys().iter().all(|k| !k.starts_with("rights/")));
    }

    #[tokio::test]
    async fn test_partial_fan_out_completes_on_resume() {
        let h = harness();
        let c = &h.coordinator;
        // Claim and submission land, then the ledger fails.
        h.ledger.fail_writes_after(2);
        let err = c
            .submit_request(&a("R"), &p("u1"), &[p("u2"), p("u3")], t(100))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Store(_)));
        assert!(!err.is_retryable());
        assert!(rights_of(c, "R", "u1").await.contains(Right::Owner));
        assert!(rights_of(c, "R", "u3").await.is_empty());

        h.ledger.heal();
        c.resume_request(&a("R"), &p("u1"), &[p("u2"), p("u3")], t(100))
            .await
            .unwrap();
        assert!(rights_of(c, "R", "u3").await.contains(Right::Viewer));
        assert!(c.mailbox(&p("u3")).unwrap().requests.contains_key(&a("R")));
        assert_eq!(c.mailbox(&p("u1")).unwrap().submissions.len(), 1);
    }

    #[tokio::test]
    async fn test_resume_requires_owner() {
        let h = harness();
        let c = &h.coordinator;
        c.submit_request(&a("R"), &p("u1"), &[p("u2")], t(1))
            .await
            .unwrap();
        assert!(matches!(
            c.resume_request(&a("R"), &p("u2"), &[p("u3")], t(1)).await,
            Err(WorkflowError::Authorization { .. })
        ));
    }

    #[tokio::test]
    async fn test_submit_request_document_allocates_ids() {
        let h = harness();
        let c = &h.coordinator;
        let first = c
            .submit_request_document(&p("u1"), &[p("u2")], "cover=fire", t(1))
            .await
            .unwrap();
        let second = c
            .submit_request_document(&p("u1"), &[p("u3")], "cover=flood", t(2))
            .await
            .unwrap();
        assert_eq!(first, a("REQ-0"));
        assert_eq!(second, a("REQ-1"));
        let doc = c.request_document(&first, &p("u2")).await.unwrap();
        assert_eq!(doc.terms, "cover=fire");
        assert_eq!(doc.status, RequestStatus::Open);
        assert!(matches!(
            c.request_document(&first, &p("u3")).await,
            Err(WorkflowError::Authorization { .. })
        ));
        assert!(matches!(
            c.request_document(&a("REQ-9"), &p("u1")).await,
            Err(WorkflowError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_generated_id_prefixes_are_refused() {
        let h = harness();
        let c = &h.coordinator;
        for id in ["PROP-R-0", "REQ-7"] {
            assert!(matches!(
                c.submit_request(&a(id), &p("mallory"), &[p("u2")], t(1)).await,
                Err(WorkflowError::ReservedId(_))
            ));
            assert!(matches!(
                c.submit_request_with_retry(&a(id), &p("mallory"), &[p("u2")], t(1))
                    .await,
                Err(WorkflowError::ReservedId(_))
            ));
        }
        assert!(h.ledger.keys().iter().all(|k| !k.starts_with("rights/")));
        // Only the exact generated shape is reserved.
        c.submit_request(&a("REQUEST-1"), &p("u1"), &[p("u2")], t(1))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_taken_proposal_id_is_skipped() {
        let h = harness();
        let c = &h.coordinator;
        c.rights()
            .grant_rights(
                &a("PROP-R-0"),
                &p("mallory"),
                &RightSet::from([Right::Owner, Right::Viewer]),
            )
            .await
            .unwrap();
        c.submit_request(&a("R"), &p("u1"), &[p("u2")], t(1))
            .await
            .unwrap();
        let prop = c
            .submit_proposal_with_terms(&a("R"), &p("u2"), "premium=10", t(2))
            .await
            .unwrap();
        assert_eq!(prop, a("PROP-R-1"));
        let holders: Vec<ParticipantId> = c
            .rights()
            .holders(&prop)
            .await
            .unwrap()
            .into_iter()
            .map(|(p, _)| p)
            .collect();
        assert_eq!(holders, vec![p("u1"), p("u2")]);
        assert!(matches!(
            c.proposal_document(&prop, &p("mallory")).await,
            Err(WorkflowError::Authorization { .. })
        ));
        assert!(rights_of(c, "PROP-R-0", "u2").await.is_empty());
        assert!(rights_of(c, "PROP-R-0", "u1").await.is_empty());
        assert!(c.mailbox(&p("mallory")).unwrap().proposals.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_submits_leave_one_owner() {
        let h = harness();
        let c = &h.coordinator;
        let (asset, u1, u2, approvers) = (a("R"), p("u1"), p("u2"), [p("u3")]);
        let (first, second) = tokio::join!(
            c.submit_request(&asset, &u1, &approvers, t(1)),
            c.submit_request(&asset, &u2, &approvers, t(1)),
        );
        assert_eq!(
            [&first, &second].iter().filter(|r| r.is_ok()).count(),
            1
        );
        let owners: Vec<ParticipantId> = c
            .rights()
            .holders(&a("R"))
            .await
            .unwrap()
            .into_iter()
            .filter(|(_, rights)| rights.contains(Right::Owner))
            .map(|(p, _)| p)
            .collect();
        assert_eq!(owners.len(), 1);
        let loser = if first.is_ok() { second } else { first };
        assert!(matches!(loser, Err(WorkflowError::AlreadyExists(_))));
    }

    #[tokio::test]
    async fn test_request_terms_never_written_under_taken_id() {
        let h = harness();
        let c = &h.coordinator;
        c.rights()
            .grant_rights(
                &a("REQ-0"),
                &p("mallory"),
                &RightSet::from([Right::Owner, Right::Viewer]),
            )
            .await
            .unwrap();
        let id = c
            .submit_request_document(&p("u1"), &[p("u2")], "secret-terms", t(1))
            .await
            .unwrap();
        assert_eq!(id, a("REQ-1"));
        assert!(matches!(
            c.request_document(&a("REQ-0"), &p("mallory")).await,
            Err(WorkflowError::NotFound(_))
        ));
        assert!(matches!(
            c.request_document(&id, &p("mallory")).await,
            Err(WorkflowError::Authorization { .. })
        ));
        assert!(!h.ledger.keys().contains(&"documents/request/REQ-0".to_string()));
        assert_eq!(
            c.request_document(&id, &p("u2")).await.unwrap().terms,
            "secret-terms"
        );
    }

    // ── submit_proposal ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_proposal_grants_and_entries() {
        let h = harness();
        let c = &h.coordinator;
        let prop = opened_with_bid(c).await;
        assert_eq!(prop, a("PROP-R-0"));
        assert!(rights_of(c, prop.as_str(), "u2")
            .await
            .covers(&RightSet::from([Right::Owner, Right::Viewer, Right::Updater])));
        assert!(rights_of(c, prop.as_str(), "u1")
            .await
            .covers(&RightSet::from([Right::Viewer, Right::Approval, Right::Updater])));
        let u1 = c.mailbox(&p("u1")).unwrap().proposals[&prop].clone();
        let u2 = c.mailbox(&p("u2")).unwrap().proposals[&prop].clone();
        assert_eq!(u1, u2);
        assert_eq!(u1.submission_id, a("R"));
        assert_eq!(u1.updated_by, p("u2"));
    }

    #[tokio::test]
    async fn test_proposal_without_viewer_mutates_nothing() {
        let h = harness();
        let c = &h.coordinator;
        c.submit_request(&a("R"), &p("u1"), &[p("u2")], t(1))
            .await
            .unwrap();
        let writes = h.ledger.write_count();
        let keys = h.ledger.keys();
        let err = c
            .submit_proposal(&a("R"), &p("outsider"), t(2))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Authorization { .. }));
        assert_eq!(h.ledger.write_count(), writes);
        assert_eq!(h.ledger.keys(), keys);
    }

    #[tokio::test]
    async fn test_requestor_cannot_bid_on_own_request() {
        let h = harness();
        let c = &h.coordinator;
        c.submit_request(&a("R"), &p("u1"), &[p("u2")], t(1))
            .await
            .unwrap();
        // The requestor can view R but was never asked for it.
        assert!(matches!(
            c.submit_proposal(&a("R"), &p("u1"), t(2)).await,
            Err(WorkflowError::IllegalState(_))
        ));
    }

    #[tokio::test]
    async fn test_proposal_document_visibility() {
        let h = harness();
        let c = &h.coordinator;
        c.submit_request(&a("R"), &p("u1"), &[p("u2"), p("u3")], t(1))
            .await
            .unwrap();
        let prop = c
            .submit_proposal_with_terms(&a("R"), &p("u2"), "premium=10", t(2))
            .await
            .unwrap();
        let doc = c.proposal_document(&prop, &p("u1")).await.unwrap();
        assert_eq!(doc.status, ProposalStatus::Bid);
        assert_eq!(doc.bidder, p("u2"));
        assert_eq!(doc.requestor, p("u1"));
        // A competing requestee cannot read another bid.
        assert!(matches!(
            c.proposal_document(&prop, &p("u3")).await,
            Err(WorkflowError::Authorization { .. })
        ));
    }

    // ── counter_propose ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_counter_updates_both_mailboxes() {
        let h = harness();
        let c = &h.coordinator;
        let prop = opened_with_bid(c).await;
        c.counter_propose(&prop, &p("u1"), t(300)).await.unwrap();
        for who in ["u1", "u2"] {
            let entry = c.mailbox(&p(who)).unwrap().proposals[&prop].clone();
            assert_eq!(entry.updated, t(300));
            assert_eq!(entry.updated_by, p("u1"));
            assert_eq!(entry.created, t(200));
        }
    }

    #[tokio::test]
    async fn test_counter_without_entry_is_not_found() {
        let h = harness();
        let c = &h.coordinator;
        let prop = opened_with_bid(c).await;
        assert!(matches!(
            c.counter_propose(&prop, &p("u3"), t(300)).await,
            Err(WorkflowError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_counter_with_third_holder_is_illegal_state() {
        let h = harness();
        let c = &h.coordinator;
        let prop = opened_with_bid(c).await;
        c.rights()
            .grant_rights(&prop, &p("auditor"), &RightSet::from([Right::Viewer]))
            .await
            .unwrap();
        assert!(matches!(
            c.counter_propose(&prop, &p("u1"), t(300)).await,
            Err(WorkflowError::IllegalState(_))
        ));
    }

    #[tokio::test]
    async fn test_counter_with_terms_updates_document() {
        let h = harness();
        let c = &h.coordinator;
        c.submit_request(&a("R"), &p("u1"), &[p("u2")], t(1))
            .await
            .unwrap();
        let prop = c
            .submit_proposal_with_terms(&a("R"), &p("u2"), "premium=10", t(2))
            .await
            .unwrap();
        c.counter_propose_with_terms(&prop, &p("u1"), "premium=8", t(3))
            .await
            .unwrap();
        let doc = c.proposal_document(&prop, &p("u2")).await.unwrap();
        assert_eq!(doc.status, ProposalStatus::Counter);
        assert_eq!(doc.terms, "premium=8");
        assert_eq!(doc.updated_by, p("u1"));
    }

    #[tokio::test]
    async fn test_counter_with_terms_creates_missing_document() {
        let h = harness();
        let c = &h.coordinator;
        let prop = opened_with_bid(c).await;
        c.counter_propose_with_terms(&prop, &p("u1"), "premium=8", t(3))
            .await
            .unwrap();
        let doc = c.proposal_document(&prop, &p("u1")).await.unwrap();
        assert_eq!(doc.bidder, p("u2"));
        assert_eq!(doc.requestor, p("u1"));
        assert_eq!(doc.created, t(200));
    }

    #[tokio::test]
    async fn test_bidder_counter_rebuilds_document_from_entry() {
        let h = harness();
        let c = &h.coordinator;
        let prop = opened_with_bid(c).await;
        c.counter_propose(&prop, &p("u1"), t(300)).await.unwrap();
        c.counter_propose_with_terms(&prop, &p("u2"), "premium=9", t(400))
            .await
            .unwrap();
        let doc = c.proposal_document(&prop, &p("u1")).await.unwrap();
        assert_eq!(doc.bidder, p("u2"));
        assert_eq!(doc.requestor, p("u1"));
        assert_eq!(doc.updated_by, p("u2"));
        assert_eq!(c.mailbox(&p("u1")).unwrap().proposals[&prop].bidder, p("u2"));
    }

    // ── accept / reject ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_accept_moves_proposal_for_both_parties() {
        let h = harness();
        let c = &h.coordinator;
        let prop = opened_with_bid(c).await;
        c.accept(&prop, &p("u1"), t(400)).await.unwrap();
        for who in ["u1", "u2"] {
            let mailbox = c.mailbox(&p(who)).unwrap();
            assert!(!mailbox.proposals.contains_key(&prop));
            assert_eq!(mailbox.accepted[&prop].submission_id, a("R"));
            assert_eq!(mailbox.accepted[&prop].accepted, t(400));
            assert_eq!(
                mailbox.contracts[&prop].requestees,
                BTreeSet::from([p("u1"), p("u2")])
            );
        }
        // Rights are untouched.
        assert!(rights_of(c, prop.as_str(), "u2").await.contains(Right::Owner));
    }

    #[tokio::test]
    async fn test_only_approval_holder_finalizes() {
        let h = harness();
        let c = &h.coordinator;
        let prop = opened_with_bid(c).await;
        assert!(matches!(
            c.accept(&prop, &p("u2"), t(400)).await,
            Err(WorkflowError::Authorization { .. })
        ));
        assert!(matches!(
            c.reject(&prop, &p("u3"), t(400)).await,
            Err(WorkflowError::Authorization { .. })
        ));
    }

    #[tokio::test]
    async fn test_reject_then_accept_is_illegal() {
        let h = harness();
        let c = &h.coordinator;
        let prop = opened_with_bid(c).await;
        c.reject(&prop, &p("u1"), t(400)).await.unwrap();
        c.reject(&prop, &p("u1"), t(500)).await.unwrap();
        let u2 = c.mailbox(&p("u2")).unwrap();
        assert_eq!(u2.rejected[&prop].rejected, t(400));
        assert_eq!(u2.rejected[&prop].proposal_ids, BTreeSet::from([prop.clone()]));
        assert!(matches!(
            c.accept(&prop, &p("u1"), t(600)).await,
            Err(WorkflowError::IllegalState(_))
        ));
        assert!(matches!(
            c.counter_propose(&prop, &p("u1"), t(600)).await,
            Err(WorkflowError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_accept_marks_documents() {
        let h = harness();
        let c = &h.coordinator;
        let req = c
            .submit_request_document(&p("u1"), &[p("u2")], "cover=fire", t(1))
            .await
            .unwrap();
        let prop = c
            .submit_proposal_with_terms(&req, &p("u2"), "premium=10", t(2))
            .await
            .unwrap();
        c.accept(&prop, &p("u1"), t(3)).await.unwrap();
        assert_eq!(
            c.proposal_document(&prop, &p("u2")).await.unwrap().status,
            ProposalStatus::Accepted
        );
        assert_eq!(
            c.request_document(&req, &p("u1")).await.unwrap().status,
            RequestStatus::Contracted
        );
    }

    #[tokio::test]
    async fn test_accept_closes_request() {
        let h = harness();
        let c = &h.coordinator;
        c.submit_request(&a("R"), &p("u1"), &[p("u2"), p("u3")], t(1))
            .await
            .unwrap();
        let won = c.submit_proposal(&a("R"), &p("u2"), t(2)).await.unwrap();
        let lost = c.submit_proposal(&a("R"), &p("u3"), t(3)).await.unwrap();
        c.accept(&won, &p("u1"), t(4)).await.unwrap();

        let u1 = c.mailbox(&p("u1")).unwrap();
        assert!(u1.proposals.is_empty());
        assert_eq!(u1.accepted.len(), 1);
        assert_eq!(u1.rejected[&lost].submission_ids, BTreeSet::from([a("R")]));
        let u3 = c.mailbox(&p("u3")).unwrap();
        assert!(u3.proposals.is_empty());
        assert_eq!(u3.rejected[&lost].rejected, t(4));

        assert!(matches!(
            c.accept(&lost, &p("u1"), t(5)).await,
            Err(WorkflowError::IllegalState(_))
        ));
        assert!(matches!(
            c.submit_proposal(&a("R"), &p("u3"), t(6)).await,
            Err(WorkflowError::IllegalState(_))
        ));
        // Replaying the accepted one stays a no-op.
        c.accept(&won, &p("u1"), t(7)).await.unwrap();
        assert_eq!(c.mailbox(&p("u2")).unwrap().accepted[&won].accepted, t(4));
    }

    #[tokio::test]
    async fn test_interrupted_close_blocks_second_accept() {
        let h = harness();
        let c = &h.coordinator;
        c.submit_request(&a("R"), &p("u1"), &[p("u2"), p("u3")], t(1))
            .await
            .unwrap();
        let won = c.submit_proposal(&a("R"), &p("u2"), t(2)).await.unwrap();
        let lost = c.submit_proposal(&a("R"), &p("u3"), t(3)).await.unwrap();
        // Both parties of the winner settle, then the ledger fails before
        // the other proposal is rejected.
        h.ledger.fail_writes_after(2);
        assert!(c.accept(&won, &p("u1"), t(4)).await.is_err());
        assert!(c.mailbox(&p("u3")).unwrap().proposals.contains_key(&lost));

        assert!(matches!(
            c.accept(&lost, &p("u1"), t(5)).await,
            Err(WorkflowError::IllegalState(_))
        ));
        assert!(matches!(
            c.counter_propose(&lost, &p("u3"), t(5)).await,
            Err(WorkflowError::IllegalState(_))
        ));

        h.ledger.heal();
        c.accept(&won, &p("u1"), t(4)).await.unwrap();
        assert!(c.mailbox(&p("u3")).unwrap().rejected.contains_key(&lost));
        assert!(c.mailbox(&p("u1")).unwrap().proposals.is_empty());
    }

    #[tokio::test]
    async fn test_reject_leaves_request_open() {
        let h = harness();
        let c = &h.coordinator;
        let prop = opened_with_bid(c).await;
        c.reject(&prop, &p("u1"), t(300)).await.unwrap();
        let next = c.submit_proposal(&a("R"), &p("u3"), t(400)).await.unwrap();
        c.accept(&next, &p("u1"), t(500)).await.unwrap();
        assert!(c.mailbox(&p("u3")).unwrap().contracts.contains_key(&next));
    }

    #[tokio::test]
    async fn test_partial_accept_completes_on_replay() {
        let h = harness();
        let c = &h.coordinator;
        let prop = opened_with_bid(c).await;
        // Only the first party's mailbox is written.
        h.ledger.fail_writes_after(1);
        assert!(c.accept(&prop, &p("u1"), t(400)).await.is_err());
        assert!(c.mailbox(&p("u1")).unwrap().proposals.contains_key(&prop));
        h.ledger.heal();
        c.accept(&prop, &p("u1"), t(400)).await.unwrap();
        assert!(c.mailbox(&p("u1")).unwrap().accepted.contains_key(&prop));
        assert!(c.mailbox(&p("u2")).unwrap().accepted.contains_key(&prop));
    }

    // ── enrollment and events ───────────────────────────────────────────────

    #[tokio::test]
    async fn test_request_event_addresses_requestees() {
        let h = harness();
        let c = &h.coordinator;
        c.enroll(&p("u2"), "u2@reinsurer.example", t(1)).unwrap();
        let mut events = c.subscribe();
        c.submit_request(&a("R"), &p("u1"), &[p("u2"), p("u3")], t(100))
            .await
            .unwrap();
        let event = events.try_recv().unwrap();
        assert_eq!(event.request_id, a("R"));
        assert_eq!(event.requestor, p("u1"));
        assert_eq!(event.requestor_contact, None);
        assert_eq!(
            event.recipients,
            vec![
                Recipient {
                    participant: p("u2"),
                    contact: Some("u2@reinsurer.example".to_string()),
                },
                Recipient {
                    participant: p("u3"),
                    contact: None,
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_refused_request_publishes_nothing() {
        let h = harness();
        let c = &h.coordinator;
        c.submit_request(&a("R"), &p("u1"), &[p("u2")], t(1))
            .await
            .unwrap();
        let mut events = c.subscribe();
        assert!(c
            .submit_request(&a("R"), &p("u9"), &[p("u2")], t(2))
            .await
            .is_err());
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_document_request_publishes_generated_id() {
        let h = harness();
        let c = &h.coordinator;
        let mut events = c.subscribe();
        let id = c
            .submit_request_document(&p("u1"), &[p("u2")], "cover=fire", t(1))
            .await
            .unwrap();
        assert_eq!(events.try_recv().unwrap().request_id, id);
    }

    #[test]
    fn test_enroll_rejects_blank_contact() {
        let h = harness();
        assert!(matches!(
            h.coordinator.enroll(&p("u1"), "  ", t(1)),
            Err(WorkflowError::InvalidInput(_))
        ));
        assert_eq!(h.coordinator.enrollment(&p("u1")).unwrap(), None);
    }

    // ── retry ───────────────────────────────────────────────────────────────

    /// Authority that times out on selected calls. Calls in `fail_on` time
    /// out before reaching the registry; claims in `lose` are applied and
    /// then time out.
    struct FlakyRights {
        inner: LocalRights<Arc<NullLedger>>,
        calls: AtomicUsize,
        fail_on: Mutex<Vec<usize>>,
        lose: Mutex<Vec<usize>>,
    }

    impl FlakyRights {
        fn check(&self) -> Result<usize, AuthorityError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_on.lock().unwrap().contains(&n) {
                return Err(AuthorityError::Timeout(format!("call {n}")));
            }
            Ok(n)
        }
    }

    #[async_trait]
    impl RightsAuthority for FlakyRights {
        async fn grant_rights(
            &self,
            asset: &AssetId,
            participant: &ParticipantId,
            rights: &RightSet,
        ) -> Result<(), AuthorityError> {
            self.check()?;
            self.inner.grant_rights(asset, participant, rights).await
        }

        async fn claim_asset(
            &self,
            asset: &AssetId,
            participant: &ParticipantId,
            rights: &RightSet,
        ) -> Result<bool, AuthorityError> {
            let n = self.check()?;
            let claimed = self.inner.claim_asset(asset, participant, rights).await?;
            if self.lose.lock().unwrap().contains(&n) {
                return Err(AuthorityError::Timeout(format!("answer to call {n} lost")));
            }
            Ok(claimed)
        }

        async fn asset_rights(
            &self,
            asset: &AssetId,
            participant: &ParticipantId,
        ) -> Result<AssetRightsResponse, AuthorityError> {
            self.check()?;
            self.inner.asset_rights(asset, participant).await
        }

        async fn holders(
            &self,
            asset: &AssetId,
        ) -> Result<Vec<(ParticipantId, RightSet)>, AuthorityError> {
            self.check()?;
            self.inner.holders(asset).await
        }
    }

    fn flaky(fail_on: Vec<usize>, lose: Vec<usize>) -> Coordinator {
        let ledger = Arc::new(NullLedger::new());
        let registry = Arc::new(RightsRegistry::new(Arc::clone(&ledger)));
        let rights = FlakyRights {
            inner: LocalRights::new(registry),
            calls: AtomicUsize::new(0),
            fail_on: Mutex::new(fail_on),
            lose: Mutex::new(lose),
        };
        Coordinator::new(ledger, Arc::new(rights))
            .unwrap()
            .with_retry_policy(RetryPolicy {
                max_attempts: 4,
                backoff: Duration::from_millis(1),
            })
    }

    #[tokio::test]
    async fn test_submit_with_retry_resumes_after_timeout() {
        // Call 0 is the claim, call 1 the first requestee grant.
        let c = flaky(vec![1], vec![]);
        c.submit_request_with_retry(&a("R"), &p("u1"), &[p("u2"), p("u3")], t(1))
            .await
            .unwrap();
        for who in ["u2", "u3"] {
            assert!(c.mailbox(&p(who)).unwrap().requests.contains_key(&a("R")));
        }
    }

    #[tokio::test]
    async fn test_submit_without_retry_surfaces_timeout() {
        let c = flaky(vec![1], vec![]);
        let err = c
            .submit_request(&a("R"), &p("u1"), &[p("u2")], t(1))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_submit_with_retry_after_lost_claim_answer() {
        let c = flaky(vec![], vec![0]);
        c.submit_request_with_retry(&a("R"), &p("u1"), &[p("u2")], t(1))
            .await
            .unwrap();
        assert!(c.mailbox(&p("u2")).unwrap().requests.contains_key(&a("R")));
        assert!(rights_of(&c, "R", "u1").await.contains(Right::Owner));
    }

    #[tokio::test]
    async fn test_proposal_retry_reuses_id() {
        // submit_request uses calls 0 and 1; the proposal's viewer check is
        // call 2, the claim call 3 and the requestor grant call 4.
        let c = flaky(vec![4], vec![]);
        c.submit_request(&a("R"), &p("u1"), &[p("u2")], t(1))
            .await
            .unwrap();
        let prop = c
            .submit_proposal_with_retry(&a("R"), &p("u2"), None, t(2))
            .await
            .unwrap();
        assert_eq!(prop, a("PROP-R-0"));
        let u1 = c.mailbox(&p("u1")).unwrap();
        assert_eq!(u1.proposals.len(), 1);
        assert!(u1.proposals.contains_key(&prop));
        assert!(rights_of(&c, prop.as_str(), "u1")
            .await
            .contains(Right::Approval));
    }

    #[tokio::test]
    async fn test_proposal_claim_with_lost_answer_keeps_its_id() {
        let c = flaky(vec![], vec![3]);
        c.submit_request(&a("R"), &p("u1"), &[p("u2")], t(1))
            .await
            .unwrap();
        let prop = c
            .submit_proposal_with_retry(&a("R"), &p("u2"), None, t(2))
            .await
            .unwrap();
        assert_eq!(prop, a("PROP-R-0"));
        assert!(rights_of(&c, prop.as_str(), "u1")
            .await
            .contains(Right::Approval));
    }
}
