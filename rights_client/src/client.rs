//! Rights checks against a registry in another service.

use std::sync::Arc;
use std::time::Duration;

use accord_rights::{AssetRightsResponse, AuthorityError, HolderEntry, RightsAuthority};
use accord_types::{AssetId, IdentityProvider, ParticipantId, RightSet, ServiceName};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::{ClientError, TransportError};
use crate::transport::{HttpTransport, Transport};

/// Default timeout for cross-service rights calls.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Client for a remote rights registry.
///
/// Every call is made on behalf of the caller resolved by the identity
/// provider at call time.
pub struct RightsClient<T = HttpTransport> {
    transport: T,
    address: String,
    identity: Arc<dyn IdentityProvider>,
}

impl RightsClient<HttpTransport> {
    /// HTTP client for the registry at `address`.
    pub fn new(
        address: &str,
        identity: Arc<dyn IdentityProvider>,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        let transport = HttpTransport::new(timeout)
            .map_err(|e| ClientError::from_transport("creating client".to_string(), e))?;
        Self::with_transport(transport, address, identity)
    }

    /// Resolve `service` through the registry at `registry_address`, then
    /// connect to it.
    pub async fn from_registry(
        registry_address: &str,
        service: &ServiceName,
        identity: Arc<dyn IdentityProvider>,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        let registry = Self::new(registry_address, Arc::clone(&identity), timeout)?;
        let address = registry.resolve_service(service).await?;
        debug!(%service, %address, "resolved rights service");
        Self::new(&address, identity, timeout)
    }
}

impl<T: Transport> RightsClient<T> {
    pub fn with_transport(
        transport: T,
        address: &str,
        identity: Arc<dyn IdentityProvider>,
    ) -> Result<Self, ClientError> {
        let address = address.trim();
        if address.is_empty() {
            return Err(ClientError::InvalidAddress("address is empty".to_string()));
        }
        Ok(Self {
            transport,
            address: address.to_string(),
            identity,
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Fail unless the current caller holds every right in `required` on
    /// `asset`.
    ///
    /// A missing asset is `NotFound`; a timeout or connection failure is a
    /// retryable error, never a denial.
    pub async fn assert_rights(
        &self,
        asset: &AssetId,
        required: &RightSet,
    ) -> Result<(), ClientError> {
        let caller = self.identity.current_caller()?;
        let response = self
            .fetch_asset_rights(&caller, asset)
            .await
            .map_err(|e| {
                ClientError::from_transport(
                    format!("checking {required} for {caller} on {asset}"),
                    e,
                )
            })?;
        if !response.exists {
            return Err(ClientError::NotFound(asset.clone()));
        }
        let missing: RightSet = response.rights.missing(required).into_iter().collect();
        if !missing.is_empty() {
            debug!(%caller, %asset, %missing, "rights assertion denied");
            return Err(ClientError::Authorization {
                participant: caller,
                asset: asset.clone(),
                missing,
            });
        }
        Ok(())
    }

    pub async fn get_asset_rights(
        &self,
        participant: &ParticipantId,
        asset: &AssetId,
    ) -> Result<AssetRightsResponse, ClientError> {
        self.fetch_asset_rights(participant, asset)
            .await
            .map_err(|e| {
                ClientError::from_transport(format!("querying {participant} on {asset}"), e)
            })
    }

    pub async fn get_asset_holders(
        &self,
        asset: &AssetId,
    ) -> Result<Vec<(ParticipantId, RightSet)>, ClientError> {
        let entries: Vec<HolderEntry> = self
            .invoke("get_asset_holders", &[asset.to_string()])
            .await
            .map_err(|e| ClientError::from_transport(format!("listing holders of {asset}"), e))?;
        Ok(entries.into_iter().map(Into::into).collect())
    }

    pub async fn grant(
        &self,
        asset: &AssetId,
        participant: &ParticipantId,
        rights: &RightSet,
    ) -> Result<(), ClientError> {
        let args = [
            asset.to_string(),
            participant.to_string(),
            rights.iter().map(|r| r.as_str()).collect::<Vec<_>>().join(","),
        ];
        let _: serde_json::Value = self.invoke("grant_rights", &args).await.map_err(|e| {
            ClientError::from_transport(format!("granting {rights} to {participant} on {asset}"), e)
        })?;
        Ok(())
    }

    /// Create `asset` with `participant` as first holder; `false` if taken.
    pub async fn claim(
        &self,
        asset: &AssetId,
        participant: &ParticipantId,
        rights: &RightSet,
    ) -> Result<bool, ClientError> {
        let args = [
            asset.to_string(),
            participant.to_string(),
            rights.iter().map(|r| r.as_str()).collect::<Vec<_>>().join(","),
        ];
        self.invoke("claim_asset", &args).await.map_err(|e| {
            ClientError::from_transport(format!("claiming {asset} for {participant}"), e)
        })
    }

    pub async fn resolve_service(&self, service: &ServiceName) -> Result<String, ClientError> {
        self.invoke("get_service", &[service.to_string()])
            .await
            .map_err(|e| ClientError::from_transport(format!("resolving service {service}"), e))
    }

    async fn fetch_asset_rights(
        &self,
        participant: &ParticipantId,
        asset: &AssetId,
    ) -> Result<AssetRightsResponse, TransportError> {
        self.invoke("get_asset_rights", &[participant.to_string(), asset.to_string()])
            .await
    }

    async fn invoke<R: DeserializeOwned>(
        &self,
        command: &str,
        args: &[String],
    ) -> Result<R, TransportError> {
        let caller = self
            .identity
            .current_caller()
            .map_err(|e| TransportError::RequestFailed(e.to_string()))?;
        let bytes = self
            .transport
            .call(&self.address, &caller, command, args)
            .await
            .inspect_err(|e| warn!(command, address = %self.address, error = %e, "rights call failed"))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| TransportError::InvalidResponse(format!("{command}: {e}")))
    }
}

#[async_trait]
impl<T: Transport> RightsAuthority for RightsClient<T> {
    async fn grant_rights(
        &self,
        asset: &AssetId,
        participant: &ParticipantId,
        rights: &RightSet,
    ) -> Result<(), AuthorityError> {
        Ok(self.grant(asset, participant, rights).await?)
    }

    async fn claim_asset(
        &self,
        asset: &AssetId,
        participant: &ParticipantId,
        rights: &RightSet,
    ) -> Result<bool, AuthorityError> {
        Ok(self.claim(asset, participant, rights).await?)
    }

    async fn asset_rights(
        &self,
        asset: &AssetId,
        participant: &ParticipantId,
    ) -> Result<AssetRightsResponse, AuthorityError> {
        Ok(self.get_asset_rights(participant, asset).await?)
    }

    async fn holders(
        &self,
        asset: &AssetId,
    ) -> Result<Vec<(ParticipantId, RightSet)>, AuthorityError> {
        Ok(self.get_asset_holders(asset).await?)
    }

    async fn asset_exists(&self, asset: &AssetId) -> Result<bool, AuthorityError> {
        let caller = self
            .identity
            .current_caller()
            .map_err(ClientError::from)?;
        Ok(self.get_asset_rights(&caller, asset).await?.exists)
    }
}
