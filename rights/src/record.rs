//! The per-asset rights record.

use accord_types::{ParticipantId, Right, RightSet};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Rights held on a single asset, keyed by participant.
///
/// Sets only ever grow.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RightsRecord {
    pub rights: BTreeMap<ParticipantId, RightSet>,
}

impl RightsRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Union `rights` into the participant's set. Returns `true` if the
    /// record changed.
    pub fn assign(&mut self, participant: &ParticipantId, rights: &RightSet) -> bool {
        match self.rights.get_mut(participant) {
            Some(existing) => existing.extend_from(rights),
            None => {
                self.rights.insert(participant.clone(), rights.clone());
                true
            }
        }
    }

    /// The participant's rights; empty if none were granted.
    pub fn rights_of(&self, participant: &ParticipantId) -> RightSet {
        self.rights.get(participant).cloned().unwrap_or_default()
    }

    /// Every participant holding at least one right, in id order.
    pub fn holders(&self) -> Vec<(ParticipantId, RightSet)> {
        self.rights
            .iter()
            .filter(|(_, set)| !set.is_empty())
            .map(|(p, set)| (p.clone(), set.clone()))
            .collect()
    }
}

/// Answer to a rights query that also reports whether the asset exists.
///
/// `query_rights` alone cannot distinguish "no such asset" from "no grant";
/// cross-service callers need both to tell `NotFound` from a denial.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRightsResponse {
    pub exists: bool,
    pub rights: RightSet,
}

impl AssetRightsResponse {
    pub fn contains(&self, right: Right) -> bool {
        self.rights.contains(right)
    }
}

/// One holder in a holders listing, as sent over the wire.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HolderEntry {
    pub participant: ParticipantId,
    pub rights: RightSet,
}

impl From<(ParticipantId, RightSet)> for HolderEntry {
    fn from((participant, rights): (ParticipantId, RightSet)) -> Self {
        Self {
            participant,
            rights,
        }
    }
}

impl From<HolderEntry> for (ParticipantId, RightSet) {
    fn from(entry: HolderEntry) -> Self {
        (entry.participant, entry.rights)
    }
}
