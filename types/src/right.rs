//! Capability rights granted per (asset, participant) pair.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::TypeError;

/// A single capability on an asset.
///
/// Rights are a closed set. Authorization is always a membership check on a
/// [`RightSet`], never a type hierarchy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Right {
    /// Created the asset, or was handed ownership of a follow-on asset.
    Owner,
    /// May read the asset and the documents attached to it.
    Viewer,
    /// May accept or reject a proposal.
    Approval,
    /// May counter-propose.
    Updater,
}

impl Right {
    pub const ALL: [Right; 4] = [Right::Owner, Right::Viewer, Right::Approval, Right::Updater];

    pub fn as_str(&self) -> &'static str {
        match self {
            Right::Owner => "owner",
            Right::Viewer => "viewer",
            Right::Approval => "approval",
            Right::Updater => "updater",
        }
    }
}

impl fmt::Display for Right {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Right {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "owner" => Ok(Right::Owner),
            "viewer" => Ok(Right::Viewer),
            "approval" => Ok(Right::Approval),
            "updater" => Ok(Right::Updater),
            other => Err(TypeError::UnknownRight(other.to_string())),
        }
    }
}

/// An additive set of rights held by one participant on one asset.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RightSet(BTreeSet<Right>);

impl RightSet {
    pub fn new() -> Self {
        Self(BTreeSet::new())
    }

    pub fn contains(&self, right: Right) -> bool {
        self.0.contains(&right)
    }

    /// Add a right. Returns `true` if it was not already held.
    pub fn insert(&mut self, right: Right) -> bool {
        self.0.insert(right)
    }

    /// Merge `other` into this set. Returns `true` if anything was added.
    pub fn extend_from(&mut self, other: &RightSet) -> bool {
        let before = self.0.len();
        self.0.extend(other.0.iter().copied());
        self.0.len() != before
    }

    pub fn union(&self, other: &RightSet) -> RightSet {
        RightSet(self.0.union(&other.0).copied().collect())
    }

    /// Whether every right in `required` is held.
    pub fn covers(&self, required: &RightSet) -> bool {
        required.0.is_subset(&self.0)
    }

    /// Rights in `required` that are not held, in canonical order.
    pub fn missing(&self, required: &RightSet) -> Vec<Right> {
        required.0.difference(&self.0).copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = Right> + '_ {
        self.0.iter().copied()
    }

    /// Parse a comma-separated list such as `"owner,viewer"`.
    pub fn parse_list(raw: &str) -> Result<RightSet, TypeError> {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(Right::from_str)
            .collect()
    }
}

impl FromIterator<Right> for RightSet {
    fn from_iter<I: IntoIterator<Item = Right>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<const N: usize> From<[Right; N]> for RightSet {
    fn from(rights: [Right; N]) -> Self {
        rights.into_iter().collect()
    }
}

impl fmt::Display for RightSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.0.iter().map(Right::as_str).collect();
        write!(f, "{{{}}}", names.join(","))
    }
}
