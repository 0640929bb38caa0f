//! Rights registry over the ledger key-value interface.
//!
//! Key layout:
//! - `rights/<asset_id>` → bincode [`RightsRecord`]
//! - `services/<name>` → bincode [`ServiceRegistration`]

use accord_store::codec::{decode, encode};
use accord_store::{KeyedLocks, LedgerKv};
use accord_types::{AssetId, ParticipantId, RightSet, ServiceName};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::RightsError;
use crate::record::{AssetRightsResponse, RightsRecord};

const RIGHTS_PREFIX: &str = "rights/";
const SERVICES_PREFIX: &str = "services/";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
struct ServiceRegistration {
    name: ServiceName,
    address: String,
}

pub struct RightsRegistry<S> {
    kv: S,
    /// Serializes read-modify-write of one asset's record.
    locks: KeyedLocks,
}

impl<S: LedgerKv> RightsRegistry<S> {
    pub fn new(kv: S) -> Self {
        Self {
            kv,
            locks: KeyedLocks::new(),
        }
    }

    /// Union `rights` into the participant's grant on `asset`.
    ///
    /// Creates the record on first grant. Re-granting rights already held
    /// performs no write, so retries are free. Granting an empty set is a
    /// no-op and does not create a record.
    pub fn grant_rights(
        &self,
        asset: &AssetId,
        participant: &ParticipantId,
        rights: &RightSet,
    ) -> Result<(), RightsError> {
        if rights.is_empty() {
            return Ok(());
        }
        let key = rights_key(asset);
        self.locks.with_lock(&key, || {
            let mut record = self.load(&key)?.unwrap_or_default();
            if !record.assign(participant, rights) {
                debug!(%asset, %participant, %rights, "grant already held");
                return Ok(());
            }
            self.kv.put(&key, &encode(&record)?)?;
            info!(%asset, %participant, %rights, "granted rights");
            Ok(())
        })
    }

    /// Create the record for `asset` with `participant` as its first holder.
    ///
    /// Returns `false` without writing if the asset already has a record.
    /// The check and the write happen under the asset's lock, so of several
    /// concurrent claims on one id exactly one wins.
    pub fn claim_asset(
        &self,
        asset: &AssetId,
        participant: &ParticipantId,
        rights: &RightSet,
    ) -> Result<bool, RightsError> {
        if rights.is_empty() {
            return Err(RightsError::EmptyClaim(asset.clone()));
        }
        let key = rights_key(asset);
        self.locks.with_lock(&key, || {
            if self.kv.exists(&key)? {
                debug!(%asset, %participant, "asset already claimed");
                return Ok(false);
            }
            let mut record = RightsRecord::new();
            record.assign(participant, rights);
            self.kv.put(&key, &encode(&record)?)?;
            info!(%asset, %participant, %rights, "claimed asset");
            Ok(true)
        })
    }

    /// Rights held by `participant` on `asset`.
    ///
    /// Returns an empty set both when the asset has no record and when the
    /// participant holds nothing; use [`Self::asset_exists`] to tell them apart.
    pub fn query_rights(
        &self,
        asset: &AssetId,
        participant: &ParticipantId,
    ) -> Result<RightSet, RightsError> {
        Ok(self
            .load(&rights_key(asset))?
            .map(|record| record.rights_of(participant))
            .unwrap_or_default())
    }

    pub fn asset_exists(&self, asset: &AssetId) -> Result<bool, RightsError> {
        Ok(self.kv.exists(&rights_key(asset))?)
    }

    /// Existence and rights in one read.
    pub fn asset_rights(
        &self,
        asset: &AssetId,
        participant: &ParticipantId,
    ) -> Result<AssetRightsResponse, RightsError> {
        Ok(match self.load(&rights_key(asset))? {
            Some(record) => AssetRightsResponse {
                exists: true,
                rights: record.rights_of(participant),
            },
            None => AssetRightsResponse::default(),
        })
    }

    pub fn rights_record(&self, asset: &AssetId) -> Result<Option<RightsRecord>, RightsError> {
        self.load(&rights_key(asset))
    }

    /// Every participant holding rights on `asset`; empty if none.
    pub fn holders(&self, asset: &AssetId) -> Result<Vec<(ParticipantId, RightSet)>, RightsError> {
        Ok(self
            .load(&rights_key(asset))?
            .map(|record| record.holders())
            .unwrap_or_default())
    }

    // ── Service registry ──────────────────────────────────────────────────

    /// Register (or replace) the address of a workflow service.
    pub fn register_service(&self, name: &ServiceName, address: &str) -> Result<(), RightsError> {
        let address = address.trim();
        if address.is_empty() {
            return Err(RightsError::InvalidAddress {
                name: name.to_string(),
                reason: "address is empty".to_string(),
            });
        }
        let registration = ServiceRegistration {
            name: name.clone(),
            address: address.to_string(),
        };
        self.kv.put(&service_key(name), &encode(&registration)?)?;
        info!(service = %name, address, "registered service");
        Ok(())
    }

    pub fn resolve_service(&self, name: &ServiceName) -> Result<String, RightsError> {
        let bytes = self
            .kv
            .get(&service_key(name))?
            .ok_or_else(|| RightsError::ServiceNotFound(name.to_string()))?;
        let registration: ServiceRegistration = decode(&bytes)?;
        Ok(registration.address)
    }

    /// All registered services in name order.
    pub fn list_services(&self) -> Result<Vec<(ServiceName, String)>, RightsError> {
        self.kv
            .scan_prefix(SERVICES_PREFIX)?
            .into_iter()
            .map(|(_, bytes)| {
                let registration: ServiceRegistration = decode(&bytes)?;
                Ok((registration.name, registration.address))
            })
            .collect()
    }

    fn load(&self, key: &str) -> Result<Option<RightsRecord>, RightsError> {
        match self.kv.get(key)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }
}

fn rights_key(asset: &AssetId) -> String {
    format!("{RIGHTS_PREFIX}{asset}")
}

fn service_key(name: &ServiceName) -> String {
    format!("{SERVICES_PREFIX}{name}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use accord_nullables::NullLedger;
    use accord_store::StoreError;
    use accord_types::Right;
    use std::sync::Arc;

    fn registry() -> RightsRegistry<Arc<NullLedger>> {
        RightsRegistry::new(Arc::new(NullLedger::new()))
    }

    fn a(id: &str) -> AssetId {
        AssetId::new(id)
    }

    fn p(id: &str) -> ParticipantId {
        ParticipantId::new(id)
    }

    #[test]
    fn test_grant_is_union() {
        let reg = registry();
        reg.grant_rights(&a("REQ-0"), &p("u1"), &RightSet::from([Right::Owner]))
            .unwrap();
        reg.grant_rights(&a("REQ-0"), &p("u1"), &RightSet::from([Right::Viewer]))
            .unwrap();
        assert_eq!(
            reg.query_rights(&a("REQ-0"), &p("u1")).unwrap(),
            RightSet::from([Right::Owner, Right::Viewer])
        );
    }

    #[test]
    fn test_query_missing_asset_is_empty_not_error() {
        let reg = registry();
        assert!(reg.query_rights(&a("nope"), &p("u1")).unwrap().is_empty());
        assert!(!reg.asset_exists(&a("nope")).unwrap());
    }

    #[test]
    fn test_exists_but_no_grant_for_participant() {
        let reg = registry();
        reg.grant_rights(&a("REQ-0"), &p("u1"), &RightSet::from([Right::Owner]))
            .unwrap();
        assert!(reg.asset_exists(&a("REQ-0")).unwrap());
        assert!(reg.query_rights(&a("REQ-0"), &p("u2")).unwrap().is_empty());
        let resp = reg.asset_rights(&a("REQ-0"), &p("u2")).unwrap();
        assert!(resp.exists);
        assert!(resp.rights.is_empty());
    }

    #[test]
    fn test_regrant_performs_no_write() {
        let ledger = Arc::new(NullLedger::new());
        let reg = RightsRegistry::new(Arc::clone(&ledger));
        let rights = RightSet::from([Right::Viewer]);
        reg.grant_rights(&a("REQ-0"), &p("u1"), &rights).unwrap();
        let writes = ledger.write_count();
        reg.grant_rights(&a("REQ-0"), &p("u1"), &rights).unwrap();
        assert_eq!(ledger.write_count(), writes);
    }

    #[test]
    fn test_empty_grant_creates_nothing() {
        let reg = registry();
        reg.grant_rights(&a("REQ-0"), &p("u1"), &RightSet::new())
            .unwrap();
        assert!(!reg.asset_exists(&a("REQ-0")).unwrap());
    }

    #[test]
    fn test_store_failure_propagates() {
        let ledger = Arc::new(NullLedger::new());
        let reg = RightsRegistry::new(Arc::clone(&ledger));
        ledger.fail_writes_after(0);
        let err = reg
            .grant_rights(&a("REQ-0"), &p("u1"), &RightSet::from([Right::Owner]))
            .unwrap_err();
        assert!(matches!(err, RightsError::Store(StoreError::Backend(_))));
    }

    #[test]
    fn test_holders() {
        let reg = registry();
        reg.grant_rights(&a("P-1"), &p("bidder"), &RightSet::from([Right::Owner]))
            .unwrap();
        reg.grant_rights(&a("P-1"), &p("requestor"), &RightSet::from([Right::Approval]))
            .unwrap();
        let holders: Vec<ParticipantId> = reg
            .holders(&a("P-1"))
            .unwrap()
            .into_iter()
            .map(|(p, _)| p)
            .collect();
        assert_eq!(holders, vec![p("bidder"), p("requestor")]);
    }

    #[test]
    fn test_concurrent_grants_are_not_lost() {
        let reg = Arc::new(registry());
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let reg = Arc::clone(&reg);
                std::thread::spawn(move || {
                    reg.grant_rights(
                        &a("REQ-0"),
                        &p(&format!("u{i}")),
                        &RightSet::from([Right::Viewer]),
                    )
                    .unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(reg.holders(&a("REQ-0")).unwrap().len(), 16);
    }

    #[test]
    fn test_claim_only_once() {
        let reg = registry();
        let owner = RightSet::from([Right::Owner, Right::Viewer]);
        assert!(reg.claim_asset(&a("REQ-0"), &p("u1"), &owner).unwrap());
        assert!(!reg.claim_asset(&a("REQ-0"), &p("mallory"), &owner).unwrap());
        assert!(!reg.claim_asset(&a("REQ-0"), &p("u1"), &owner).unwrap());
        assert_eq!(reg.holders(&a("REQ-0")).unwrap(), vec![(p("u1"), owner)]);
    }

    #[test]
    fn test_claim_after_grant_fails() {
        let reg = registry();
        reg.grant_rights(&a("PROP-R-0"), &p("mallory"), &RightSet::from([Right::Viewer]))
            .unwrap();
        assert!(!reg
            .claim_asset(&a("PROP-R-0"), &p("u2"), &RightSet::from([Right::Owner]))
            .unwrap());
        assert!(reg.query_rights(&a("PROP-R-0"), &p("u2")).unwrap().is_empty());
    }

    #[test]
    fn test_empty_claim_is_refused() {
        let reg = registry();
        assert!(matches!(
            reg.claim_asset(&a("REQ-0"), &p("u1"), &RightSet::new()),
            Err(RightsError::EmptyClaim(_))
        ));
        assert!(!reg.asset_exists(&a("REQ-0")).unwrap());
    }

    #[test]
    fn test_concurrent_claims_have_one_winner() {
        let reg = Arc::new(registry());
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let reg = Arc::clone(&reg);
                std::thread::spawn(move || {
                    reg.claim_asset(
                        &a("REQ-0"),
                        &p(&format!("u{i}")),
                        &RightSet::from([Right::Owner]),
                    )
                    .unwrap()
                })
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
        assert_eq!(reg.holders(&a("REQ-0")).unwrap().len(), 1);
    }

    #[test]
    fn test_register_and_resolve_service() {
        let reg = registry();
        let name = ServiceName::new("negotiation");
        reg.register_service(&name, "http://10.0.0.1:7077").unwrap();
        assert_eq!(reg.resolve_service(&name).unwrap(), "http://10.0.0.1:7077");
        reg.register_service(&name, "http://10.0.0.2:7077").unwrap();
        assert_eq!(reg.resolve_service(&name).unwrap(), "http://10.0.0.2:7077");
        assert_eq!(reg.list_services().unwrap().len(), 1);
    }

    #[test]
    fn test_resolve_unknown_service() {
        let reg = registry();
        assert!(matches!(
            reg.resolve_service(&ServiceName::new("ghost")),
            Err(RightsError::ServiceNotFound(_))
        ));
    }

    #[test]
    fn test_register_rejects_empty_address() {
        let reg = registry();
        assert!(matches!(
            reg.register_service(&ServiceName::new("x"), "  "),
            Err(RightsError::InvalidAddress { .. })
        ));
    }

    #[test]
    fn test_services_do_not_count_as_assets() {
        let reg = registry();
        reg.register_service(&ServiceName::new("negotiation"), "http://x")
            .unwrap();
        assert!(!reg.asset_exists(&a("negotiation")).unwrap());
    }
}
