//! The command table.
//!
//! Every entry point is a named command with fixed positional string
//! arguments. [`Command::parse`] checks arity and argument syntax before
//! anything touches the ledger; [`execute`] runs a parsed command on behalf
//! of the caller.

use std::sync::Arc;

use accord_rights::{HolderEntry, RightsAuthority, RightsRegistry};
use accord_types::{AssetId, ParticipantId, Right, RightSet, ServiceName, Timestamp};
use accord_workflow::{is_reserved_id, Coordinator, SharedLedger, WorkflowError};
use serde_json::{json, Value};
use tracing::debug;

use crate::error::RpcError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    RegisterService {
        name: ServiceName,
        address: String,
    },
    GetService {
        name: ServiceName,
    },
    ListServices,
    /// Record the caller's contact for request notifications.
    Enroll {
        contact: String,
        at: Timestamp,
    },
    GetEnrollment,
    /// Open a request under a generated id; the caller is the requestor.
    Submit {
        requestees: Vec<ParticipantId>,
        terms: String,
        created: Timestamp,
    },
    /// Open a request under a caller-chosen id.
    NewRequest {
        id: AssetId,
        requestor: ParticipantId,
        requestees: Vec<ParticipantId>,
        created: Timestamp,
    },
    Propose {
        request_id: AssetId,
        terms: Option<String>,
        created: Timestamp,
    },
    Counter {
        proposal_id: AssetId,
        terms: Option<String>,
        updated: Timestamp,
    },
    Accept {
        proposal_id: AssetId,
        at: Timestamp,
    },
    Reject {
        proposal_id: AssetId,
        at: Timestamp,
    },
    GetRequest {
        id: AssetId,
    },
    GetProposal {
        id: AssetId,
    },
    GetUserAssets,
    GetAssetRights {
        participant: ParticipantId,
        asset: AssetId,
    },
    GetAssetHolders {
        asset: AssetId,
    },
    GrantRights {
        asset: AssetId,
        participant: ParticipantId,
        rights: RightSet,
    },
    /// Create an asset with the caller as its first holder.
    ClaimAsset {
        asset: AssetId,
        participant: ParticipantId,
        rights: RightSet,
    },
}

impl Command {
    pub fn parse(name: &str, args: &[String]) -> Result<Self, RpcError> {
        let command = match name {
            "register_service" => {
                let [name, address] = arity::<2>("register_service", args)?;
                Command::RegisterService {
                    name: ServiceName::parse(name)?,
                    address: address.trim().to_string(),
                }
            }
            "get_service" => {
                let [name] = arity::<1>("get_service", args)?;
                Command::GetService {
                    name: ServiceName::parse(name)?,
                }
            }
            "list_services" => {
                arity::<0>("list_services", args)?;
                Command::ListServices
            }
            "enroll" => {
                let [contact, at] = arity::<2>("enroll", args)?;
                Command::Enroll {
                    contact: contact.trim().to_string(),
                    at: timestamp(at)?,
                }
            }
            "get_enrollment" => {
                arity::<0>("get_enrollment", args)?;
                Command::GetEnrollment
            }
            "submit" => {
                let [requestees, terms, created] = arity::<3>("submit", args)?;
                Command::Submit {
                    requestees: ParticipantId::parse_list(requestees)?,
                    terms: terms.clone(),
                    created: timestamp(created)?,
                }
            }
            "new_request" => {
                let [id, requestor, requestees, created] = arity::<4>("new_request", args)?;
                Command::NewRequest {
                    id: AssetId::parse(id)?,
                    requestor: ParticipantId::parse(requestor)?,
                    requestees: ParticipantId::parse_list(requestees)?,
                    created: timestamp(created)?,
                }
            }
            "propose" => {
                let [request_id, terms, created] = arity::<3>("propose", args)?;
                Command::Propose {
                    request_id: AssetId::parse(request_id)?,
                    terms: optional(terms),
                    created: timestamp(created)?,
                }
            }
            "counter" => {
                let [proposal_id, terms, updated] = arity::<3>("counter", args)?;
                Command::Counter {
                    proposal_id: AssetId::parse(proposal_id)?,
                    terms: optional(terms),
                    updated: timestamp(updated)?,
                }
            }
            "accept" => {
                let [proposal_id, at] = arity::<2>("accept", args)?;
                Command::Accept {
                    proposal_id: AssetId::parse(proposal_id)?,
                    at: timestamp(at)?,
                }
            }
            "reject" => {
                let [proposal_id, at] = arity::<2>("reject", args)?;
                Command::Reject {
                    proposal_id: AssetId::parse(proposal_id)?,
                    at: timestamp(at)?,
                }
            }
            "get_request" => {
                let [id] = arity::<1>("get_request", args)?;
                Command::GetRequest {
                    id: AssetId::parse(id)?,
                }
            }
            "get_proposal" => {
                let [id] = arity::<1>("get_proposal", args)?;
                Command::GetProposal {
                    id: AssetId::parse(id)?,
                }
            }
            "get_user_assets" => {
                arity::<0>("get_user_assets", args)?;
                Command::GetUserAssets
            }
            "get_asset_rights" => {
                let [participant, asset] = arity::<2>("get_asset_rights", args)?;
                Command::GetAssetRights {
                    participant: ParticipantId::parse(participant)?,
                    asset: AssetId::parse(asset)?,
                }
            }
            "get_asset_holders" => {
                let [asset] = arity::<1>("get_asset_holders", args)?;
                Command::GetAssetHolders {
                    asset: AssetId::parse(asset)?,
                }
            }
            "grant_rights" => {
                let [asset, participant, rights] = arity::<3>("grant_rights", args)?;
                Command::GrantRights {
                    asset: AssetId::parse(asset)?,
                    participant: ParticipantId::parse(participant)?,
                    rights: RightSet::parse_list(rights)?,
                }
            }
            "claim_asset" => {
                let [asset, participant, rights] = arity::<3>("claim_asset", args)?;
                Command::ClaimAsset {
                    asset: AssetId::parse(asset)?,
                    participant: ParticipantId::parse(participant)?,
                    rights: RightSet::parse_list(rights)?,
                }
            }
            other => return Err(RpcError::UnknownCommand(other.to_string())),
        };
        Ok(command)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::RegisterService { .. } => "register_service",
            Command::GetService { .. } => "get_service",
            Command::ListServices => "list_services",
            Command::Enroll { .. } => "enroll",
            Command::GetEnrollment => "get_enrollment",
            Command::Submit { .. } => "submit",
            Command::NewRequest { .. } => "new_request",
            Command::Propose { .. } => "propose",
            Command::Counter { .. } => "counter",
            Command::Accept { .. } => "accept",
            Command::Reject { .. } => "reject",
            Command::GetRequest { .. } => "get_request",
            Command::GetProposal { .. } => "get_proposal",
            Command::GetUserAssets => "get_user_assets",
            Command::GetAssetRights { .. } => "get_asset_rights",
            Command::GetAssetHolders { .. } => "get_asset_holders",
            Command::GrantRights { .. } => "grant_rights",
            Command::ClaimAsset { .. } => "claim_asset",
        }
    }
}

fn arity<'a, const N: usize>(
    command: &'static str,
    args: &'a [String],
) -> Result<&'a [String; N], RpcError> {
    args.try_into().map_err(|_| RpcError::Arity {
        command,
        expected: N,
        got: args.len(),
    })
}

/// An empty timestamp argument means "now".
fn timestamp(raw: &str) -> Result<Timestamp, RpcError> {
    if raw.trim().is_empty() {
        return Ok(Timestamp::now());
    }
    Ok(raw.parse::<Timestamp>()?)
}

fn optional(raw: &str) -> Option<String> {
    (!raw.is_empty()).then(|| raw.to_string())
}

/// Run `command` as `caller` and return its JSON result.
pub async fn execute(
    coordinator: &Coordinator,
    registry: &Arc<RightsRegistry<SharedLedger>>,
    caller: &ParticipantId,
    command: Command,
) -> Result<Value, RpcError> {
    debug!(command = command.name(), %caller, "executing command");
    let value = match command {
        Command::RegisterService { name, address } => {
            registry.register_service(&name, &address)?;
            Value::Null
        }
        Command::GetService { name } => json!(registry.resolve_service(&name)?),
        Command::ListServices => {
            let services: Vec<Value> = registry
                .list_services()?
                .into_iter()
                .map(|(name, address)| json!({ "name": name, "address": address }))
                .collect();
            Value::Array(services)
        }
        Command::Enroll { contact, at } => to_value(coordinator.enroll(caller, &contact, at)?)?,
        Command::GetEnrollment => to_value(coordinator.enrollment(caller)?)?,
        Command::Submit {
            requestees,
            terms,
            created,
        } => json!(
            coordinator
                .submit_request_document(caller, &requestees, &terms, created)
                .await?
        ),
        Command::NewRequest {
            id,
            requestor,
            requestees,
            created,
        } => {
            if &requestor != caller {
                return Err(RpcError::Forbidden(format!(
                    "{caller} cannot open a request as {requestor}"
                )));
            }
            json!(
                coordinator
                    .submit_request_with_retry(&id, &requestor, &requestees, created)
                    .await?
            )
        }
        Command::Propose {
            request_id,
            terms,
            created,
        } => json!(
            coordinator
                .submit_proposal_with_retry(&request_id, caller, terms.as_deref(), created)
                .await?
        ),
        Command::Counter {
            proposal_id,
            terms,
            updated,
        } => {
            match terms {
                Some(terms) => {
                    coordinator
                        .counter_propose_with_terms(&proposal_id, caller, &terms, updated)
                        .await?
                }
                None => coordinator.counter_propose(&proposal_id, caller, updated).await?,
            }
            Value::Null
        }
        Command::Accept { proposal_id, at } => {
            coordinator.accept(&proposal_id, caller, at).await?;
            Value::Null
        }
        Command::Reject { proposal_id, at } => {
            coordinator.reject(&proposal_id, caller, at).await?;
            Value::Null
        }
        Command::GetRequest { id } => to_value(coordinator.request_document(&id, caller).await?)?,
        Command::GetProposal { id } => {
            to_value(coordinator.proposal_document(&id, caller).await?)?
        }
        Command::GetUserAssets => to_value(coordinator.mailbox(caller)?)?,
        Command::GetAssetRights { participant, asset } => {
            // Anyone may ask about themselves; asking about others needs viewer.
            if &participant != caller {
                require_viewer(coordinator.rights(), &asset, caller).await?;
            }
            to_value(coordinator.rights().asset_rights(&asset, &participant).await?)?
        }
        Command::GetAssetHolders { asset } => {
            require_viewer(coordinator.rights(), &asset, caller).await?;
            let holders: Vec<HolderEntry> = coordinator
                .rights()
                .holders(&asset)
                .await?
                .into_iter()
                .map(HolderEntry::from)
                .collect();
            to_value(holders)?
        }
        Command::GrantRights {
            asset,
            participant,
            rights,
        } => {
            let authority = coordinator.rights();
            // Granting on an existing asset takes ownership of it.
            if authority.asset_exists(&asset).await? {
                if !authority
                    .query_rights(&asset, caller)
                    .await?
                    .contains(Right::Owner)
                {
                    return Err(RpcError::Forbidden(format!(
                        "{caller} does not own {asset}"
                    )));
                }
            } else if is_reserved_id(&asset) {
                return Err(WorkflowError::ReservedId(asset).into());
            }
            authority.grant_rights(&asset, &participant, &rights).await?;
            Value::Null
        }
        Command::ClaimAsset {
            asset,
            participant,
            rights,
        } => {
            if &participant != caller {
                return Err(RpcError::Forbidden(format!(
                    "{caller} cannot claim {asset} for {participant}"
                )));
            }
            if rights.is_empty() {
                return Err(RpcError::InvalidRequest(format!(
                    "claim on {asset} names no rights"
                )));
            }
            json!(
                coordinator
                    .rights()
                    .claim_asset(&asset, &participant, &rights)
                    .await?
            )
        }
    };
    Ok(value)
}

async fn require_viewer(
    authority: &Arc<dyn RightsAuthority>,
    asset: &AssetId,
    caller: &ParticipantId,
) -> Result<(), RpcError> {
    if authority
        .query_rights(asset, caller)
        .await?
        .contains(Right::Viewer)
    {
        return Ok(());
    }
    Err(RpcError::Forbidden(format!("{caller} cannot view {asset}")))
}

fn to_value<T: serde::Serialize>(value: T) -> Result<Value, RpcError> {
    serde_json::to_value(value).map_err(|e| RpcError::Server(format!("encoding result: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_submit() {
        let command = Command::parse("submit", &args(&["u2, u3", "price=100", "17"])).unwrap();
        assert_eq!(
            command,
            Command::Submit {
                requestees: vec![ParticipantId::new("u2"), ParticipantId::new("u3")],
                terms: "price=100".to_string(),
                created: Timestamp::new(17),
            }
        );
        assert_eq!(command.name(), "submit");
    }

    #[test]
    fn test_parse_rejects_wrong_arity() {
        let err = Command::parse("accept", &args(&["PROP-0"])).unwrap_err();
        assert!(matches!(
            err,
            RpcError::Arity {
                command: "accept",
                expected: 2,
                got: 1
            }
        ));
    }

    #[test]
    fn test_parse_unknown_command() {
        assert!(matches!(
            Command::parse("delete_everything", &[]),
            Err(RpcError::UnknownCommand(_))
        ));
    }

    #[test]
    fn test_parse_bad_right_and_timestamp() {
        assert!(matches!(
            Command::parse("grant_rights", &args(&["R", "u1", "owner,admin"])),
            Err(RpcError::InvalidArgument(_))
        ));
        assert!(matches!(
            Command::parse("accept", &args(&["PROP-0", "yesterday"])),
            Err(RpcError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_empty_terms_and_timestamp() {
        let command = Command::parse("counter", &args(&["PROP-0", "", ""])).unwrap();
        match command {
            Command::Counter { terms, updated, .. } => {
                assert_eq!(terms, None);
                assert!(updated > Timestamp::EPOCH);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_parse_enroll_and_claim() {
        assert_eq!(
            Command::parse("enroll", &args(&[" desk@cedant.example ", "9"])).unwrap(),
            Command::Enroll {
                contact: "desk@cedant.example".to_string(),
                at: Timestamp::new(9),
            }
        );
        let claim = Command::parse("claim_asset", &args(&["REQ-0", "u1", "owner,viewer"])).unwrap();
        assert_eq!(claim.name(), "claim_asset");
        assert_eq!(
            Command::parse("list_services", &[]).unwrap(),
            Command::ListServices
        );
    }

    #[test]
    fn test_get_user_assets_takes_no_args() {
        assert_eq!(
            Command::parse("get_user_assets", &[]).unwrap(),
            Command::GetUserAssets
        );
        assert!(Command::parse("get_user_assets", &args(&["u1"])).is_err());
    }
}
