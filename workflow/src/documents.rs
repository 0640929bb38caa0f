//! Request and proposal bodies.
//!
//! Mailboxes only index workflow items; the negotiated terms live here, at
//! `documents/request/<id>` and `documents/proposal/<id>`. Reading a document
//! is gated on `Viewer` by the coordinator, not by this store.

use std::collections::BTreeSet;
use std::fmt;

use accord_store::codec::{decode, encode};
use accord_store::{KeyedLocks, LedgerKv, StoreError};
use accord_types::{AssetId, ParticipantId, Timestamp};
use serde::{Deserialize, Serialize};

const REQUEST_PREFIX: &str = "documents/request/";
const PROPOSAL_PREFIX: &str = "documents/proposal/";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Open,
    /// A proposal against this request was accepted.
    Contracted,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestDocument {
    pub id: AssetId,
    pub requestor: ParticipantId,
    pub requestees: BTreeSet<ParticipantId>,
    pub terms: String,
    pub status: RequestStatus,
    pub created: Timestamp,
    pub updated: Timestamp,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProposalStatus {
    Bid,
    Counter,
    Accepted,
    Rejected,
}

impl ProposalStatus {
    pub fn is_final(&self) -> bool {
        matches!(self, ProposalStatus::Accepted | ProposalStatus::Rejected)
    }
}

impl fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProposalStatus::Bid => "bid",
            ProposalStatus::Counter => "counter",
            ProposalStatus::Accepted => "accepted",
            ProposalStatus::Rejected => "rejected",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalDocument {
    pub id: AssetId,
    pub submission_id: AssetId,
    pub requestor: ParticipantId,
    pub bidder: ParticipantId,
    pub terms: String,
    pub status: ProposalStatus,
    pub created: Timestamp,
    pub updated: Timestamp,
    pub updated_by: ParticipantId,
}

pub struct DocumentStore<S> {
    kv: S,
    locks: KeyedLocks,
}

impl<S: LedgerKv> DocumentStore<S> {
    pub fn new(kv: S) -> Self {
        Self {
            kv,
            locks: KeyedLocks::new(),
        }
    }

    pub fn put_request(&self, doc: &RequestDocument) -> Result<(), StoreError> {
        self.kv
            .put(&format!("{REQUEST_PREFIX}{}", doc.id), &encode(doc)?)
    }

    pub fn request(&self, id: &AssetId) -> Result<Option<RequestDocument>, StoreError> {
        self.load(&format!("{REQUEST_PREFIX}{id}"))
    }

    pub fn put_proposal(&self, doc: &ProposalDocument) -> Result<(), StoreError> {
        self.kv
            .put(&format!("{PROPOSAL_PREFIX}{}", doc.id), &encode(doc)?)
    }

    pub fn proposal(&self, id: &AssetId) -> Result<Option<ProposalDocument>, StoreError> {
        self.load(&format!("{PROPOSAL_PREFIX}{id}"))
    }

    /// Read-modify-write of a request document. Returns `false` if there is
    /// no such document.
    pub fn update_request(
        &self,
        id: &AssetId,
        f: impl FnOnce(&mut RequestDocument),
    ) -> Result<bool, StoreError> {
        let key = format!("{REQUEST_PREFIX}{id}");
        self.locks.with_lock(&key, || self.modify(&key, f))
    }

    /// Read-modify-write of a proposal document. Returns `false` if there is
    /// no such document.
    pub fn update_proposal(
        &self,
        id: &AssetId,
        f: impl FnOnce(&mut ProposalDocument),
    ) -> Result<bool, StoreError> {
        let key = format!("{PROPOSAL_PREFIX}{id}");
        self.locks.with_lock(&key, || self.modify(&key, f))
    }

    fn modify<T>(&self, key: &str, f: impl FnOnce(&mut T)) -> Result<bool, StoreError>
    where
        T: Serialize + serde::de::DeserializeOwned + PartialEq + Clone,
    {
        let Some(current) = self.load::<T>(key)? else {
            return Ok(false);
        };
        let mut next = current.clone();
        f(&mut next);
        if next != current {
            self.kv.put(key, &encode(&next)?)?;
        }
        Ok(true)
    }

    fn load<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.kv.get(key)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }
}
