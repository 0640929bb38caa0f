//! String identifiers for participants, assets and services.
//!
//! All three are opaque strings supplied by callers. Commas are reserved
//! because the command surface passes participant lists as comma-separated
//! positional arguments.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::TypeError;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap a raw string without validation.
            pub fn new(raw: impl Into<String>) -> Self {
                Self(raw.into())
            }

            /// Parse a caller-supplied string, rejecting empty or comma-bearing values.
            pub fn parse(raw: &str) -> Result<Self, TypeError> {
                let trimmed = raw.trim();
                if trimmed.is_empty() {
                    return Err(TypeError::EmptyIdentifier);
                }
                if trimmed.contains(',') {
                    return Err(TypeError::ReservedCharacter(trimmed.to_string()));
                }
                Ok(Self(trimmed.to_string()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn is_valid(&self) -> bool {
                !self.0.is_empty() && !self.0.contains(',')
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self::new(s)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self::new(s)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// An identity-bearing actor, as resolved by the identity collaborator.
    ParticipantId
);

string_id!(
    /// An opaque workflow item identifier (request id or proposal id) that
    /// owns a rights record.
    AssetId
);

string_id!(
    /// Logical name of a workflow service, resolved to an address through
    /// the service registry.
    ServiceName
);

impl ParticipantId {
    /// Parse a comma-separated participant list, skipping blank entries.
    pub fn parse_list(raw: &str) -> Result<Vec<ParticipantId>, TypeError> {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ParticipantId::parse)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_trims_whitespace() {
        let id = ParticipantId::parse("  insurer1 ").unwrap();
        assert_eq!(id.as_str(), "insurer1");
    }

    #[test]
    fn test_parse_rejects_empty() {
        assert_eq!(AssetId::parse("   "), Err(TypeError::EmptyIdentifier));
    }

    #[test]
    fn test_parse_rejects_comma() {
        assert!(matches!(
            ParticipantId::parse("a,b"),
            Err(TypeError::ReservedCharacter(_))
        ));
    }

    #[test]
    fn test_parse_list() {
        let list = ParticipantId::parse_list("reinsurer1, reinsurer2,,").unwrap();
        assert_eq!(
            list,
            vec![ParticipantId::new("reinsurer1"), ParticipantId::new("reinsurer2")]
        );
    }

    #[test]
    fn test_serializes_as_plain_string() {
        let id = AssetId::new("REQ-0");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"REQ-0\"");
    }
}
