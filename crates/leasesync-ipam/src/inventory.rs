//! The inventory seam driven by the reconciler.

use async_trait::async_trait;
use leasesync_core::{AddressId, InventoryRecord};

use crate::client::{AuthToken, IpamClient, IpamResult};

/// Read/write access to an address inventory.
///
/// [`IpamClient`] is the production implementation; the reconciler only
/// depends on this trait so it can run against in-memory fixtures.
#[async_trait]
pub trait AddressInventory: Send + Sync {
    async fn authenticate(&mut self) -> IpamResult<AuthToken>;

    async fn list_addresses(&self, subnet_id: &str) -> IpamResult<Vec<InventoryRecord>>;

    async fn create_address(
        &self,
        subnet_id: &str,
        record: &InventoryRecord,
    ) -> IpamResult<InventoryRecord>;

    async fn update_address(
        &self,
        id: &AddressId,
        record: &InventoryRecord,
    ) -> IpamResult<InventoryRecord>;

    async fn deactivate_address(&self, id: &AddressId) -> IpamResult<()>;
}

#[async_trait]
impl AddressInventory for IpamClient {
    async fn authenticate(&mut self) -> IpamResult<AuthToken> {
        IpamClient::authenticate(self).await
    }

    async fn list_addresses(&self, subnet_id: &str) -> IpamResult<Vec<InventoryRecord>> {
        IpamClient::list_addresses(self, subnet_id).await
    }

    async fn create_address(
        &self,
        subnet_id: &str,
        record: &InventoryRecord,
    ) -> IpamResult<InventoryRecord> {
        IpamClient::create_address(self, subnet_id, record).await
    }

    async fn update_address(
        &self,
        id: &AddressId,
        record: &InventoryRecord,
    ) -> IpamResult<InventoryRecord> {
        IpamClient::update_address(self, id, record).await
    }

    async fn deactivate_address(&self, id: &AddressId) -> IpamResult<()> {
        IpamClient::deactivate_address(self, id).await
    }
}
