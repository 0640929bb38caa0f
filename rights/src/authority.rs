//! The rights seam used by workflow code.

use std::sync::Arc;

use accord_store::LedgerKv;
use accord_types::{AssetId, ParticipantId, RightSet};
use async_trait::async_trait;

use crate::error::{AuthorityError, RightsError};
use crate::record::AssetRightsResponse;
use crate::registry::RightsRegistry;

/// Grants and queries rights, whether the registry lives in this process or
/// behind a remote service.
#[async_trait]
pub trait RightsAuthority: Send + Sync {
    async fn grant_rights(
        &self,
        asset: &AssetId,
        participant: &ParticipantId,
        rights: &RightSet,
    ) -> Result<(), AuthorityError>;

    /// Become the first holder of `asset`. `false` if it already exists.
    async fn claim_asset(
        &self,
        asset: &AssetId,
        participant: &ParticipantId,
        rights: &RightSet,
    ) -> Result<bool, AuthorityError>;

    async fn asset_rights(
        &self,
        asset: &AssetId,
        participant: &ParticipantId,
    ) -> Result<AssetRightsResponse, AuthorityError>;

    async fn holders(&self, asset: &AssetId)
        -> Result<Vec<(ParticipantId, RightSet)>, AuthorityError>;

    async fn query_rights(
        &self,
        asset: &AssetId,
        participant: &ParticipantId,
    ) -> Result<RightSet, AuthorityError> {
        Ok(self.asset_rights(asset, participant).await?.rights)
    }

    async fn asset_exists(&self, asset: &AssetId) -> Result<bool, AuthorityError> {
        Ok(!self.holders(asset).await?.is_empty())
    }
}

#[async_trait]
impl<T: RightsAuthority + ?Sized> RightsAuthority for Arc<T> {
    async fn grant_rights(
        &self,
        asset: &AssetId,
        participant: &ParticipantId,
        rights: &RightSet,
    ) -> Result<(), AuthorityError> {
        (**self).grant_rights(asset, participant, rights).await
    }

    async fn claim_asset(
        &self,
        asset: &AssetId,
        participant: &ParticipantId,
        rights: &RightSet,
    ) -> Result<bool, AuthorityError> {
        (**self).claim_asset(asset, participant, rights).await
    }

    async fn asset_rights(
        &self,
        asset: &AssetId,
        participant: &ParticipantId,
    ) -> Result<AssetRightsResponse, AuthorityError> {
        (**self).asset_rights(asset, participant).await
    }

    async fn holders(
        &self,
        asset: &AssetId,
    ) -> Result<Vec<(ParticipantId, RightSet)>, AuthorityError> {
        (**self).holders(asset).await
    }

    async fn query_rights(
        &self,
        asset: &AssetId,
        participant: &ParticipantId,
    ) -> Result<RightSet, AuthorityError> {
        (**self).query_rights(asset, participant).await
    }

    async fn asset_exists(&self, asset: &AssetId) -> Result<bool, AuthorityError> {
        (**self).asset_exists(asset).await
    }
}

impl From<RightsError> for AuthorityError {
    fn from(e: RightsError) -> Self {
        match e {
            RightsError::Store(e) => AuthorityError::Store(e),
            other => AuthorityError::Rejected(other.to_string()),
        }
    }
}

/// Colocated authority backed directly by a [`RightsRegistry`].
pub struct LocalRights<S> {
    registry: Arc<RightsRegistry<S>>,
}

impl<S: LedgerKv> LocalRights<S> {
    pub fn new(registry: Arc<RightsRegistry<S>>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<RightsRegistry<S>> {
        &self.registry
    }
}

impl<S> Clone for LocalRights<S> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
        }
    }
}

#[async_trait]
impl<S: LedgerKv> RightsAuthority for LocalRights<S> {
    async fn grant_rights(
        &self,
        asset: &AssetId,
        participant: &ParticipantId,
        rights: &RightSet,
    ) -> Result<(), AuthorityError> {
        Ok(self.registry.grant_rights(asset, participant, rights)?)
    }

    async fn claim_asset(
        &self,
        asset: &AssetId,
        participant: &ParticipantId,
        rights: &RightSet,
    ) -> Result<bool, AuthorityError> {
        Ok(self.registry.claim_asset(asset, participant, rights)?)
    }

    async fn asset_rights(
        &self,
        asset: &AssetId,
        participant: &ParticipantId,
    ) -> Result<AssetRightsResponse, AuthorityError> {
        Ok(self.registry.asset_rights(asset, participant)?)
    }

    async fn holders(
        &self,
        asset: &AssetId,
    ) -> Result<Vec<(ParticipantId, RightSet)>, AuthorityError> {
        Ok(self.registry.holders(asset)?)
    }

    async fn query_rights(
        &self,
        asset: &AssetId,
        participant: &ParticipantId,
    ) -> Result<RightSet, AuthorityError> {
        Ok(self.registry.query_rights(asset, participant)?)
    }

    async fn asset_exists(&self, asset: &AssetId) -> Result<bool, AuthorityError> {
        Ok(self.registry.asset_exists(asset)?)
    }
}
