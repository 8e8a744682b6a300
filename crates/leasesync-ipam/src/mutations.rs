//! Write operations against the phpIPAM address inventory.
//!
//! Records are never deleted: deactivation marks the address offline so a
//! transient gap in observations cannot destroy inventory data.

use std::sync::atomic::{AtomicU32, Ordering};

use leasesync_core::{AddressId, AddressStatus, InventoryRecord};
use serde::Serialize;

use crate::client::{check_status, Envelope, IpamClient, IpamError, IpamResult};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreatePayload<'a> {
    subnet_id: &'a str,
    ip: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    mac: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    hostname: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct UpdatePayload<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    mac: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    hostname: Option<&'a str>,
    /// Left out when the status was never read, so phpIPAM keeps its own.
    #[serde(skip_serializing_if = "Option::is_none")]
    tag: Option<u32>,
}

#[derive(Debug, Serialize)]
struct TagPayload {
    tag: u32,
}

impl IpamClient {
    /// Create an address record in `subnet_id`.
    ///
    /// Fails with `IpamError::Conflict` when the IP already exists there.
    pub async fn create_address(
        &self,
        subnet_id: &str,
        record: &InventoryRecord,
    ) -> IpamResult<InventoryRecord> {
        let payload = CreatePayload {
            subnet_id,
            ip: record.ip.to_string(),
            mac: record.mac.as_deref(),
            hostname: record.hostname.as_deref(),
        };

        let attempts = AtomicU32::new(0);
        let created = self
            .retry
            .execute("create_address", || async {
                attempts.fetch_add(1, Ordering::SeqCst);
                let request = self
                    .authorized(self.http().post(self.api_url("addresses/")))?
                    .json(&payload);
                let response = check_status(request.send().await?).await?;
                // The body only carries the new id; tolerate it being absent.
                let body: Option<Envelope<serde_json::Value>> = response.json().await.ok();
                Ok::<_, IpamError>(body.and_then(|b| b.id))
            })
            .await;

        let id = match created {
            Ok(id) => id,
            // An earlier attempt may have been stored before its response was
            // lost; the retry then collides with our own write.
            Err(IpamError::Conflict(detail)) if attempts.load(Ordering::SeqCst) > 1 => {
                match self.find_address(subnet_id, record).await? {
                    Some(existing) => {
                        tracing::warn!(
                            ip = %record.ip,
                            id = existing.id.as_ref().map(AddressId::as_str).unwrap_or(""),
                            "Create conflicted after a retry, adopting the stored record"
                        );
                        existing.id
                    }
                    None => return Err(IpamError::Conflict(detail)),
                }
            }
            Err(e) => return Err(e),
        };

        tracing::info!(
            ip = %record.ip,
            hostname = record.hostname.as_deref().unwrap_or(""),
            id = id.as_ref().map(AddressId::as_str).unwrap_or(""),
            "Created address"
        );

        Ok(InventoryRecord {
            id,
            ..record.clone()
        })
    }

    /// The record for `record.ip` in `subnet_id`, if it carries the same MAC
    /// and hostname we tried to write.
    async fn find_address(
        &self,
        subnet_id: &str,
        record: &InventoryRecord,
    ) -> IpamResult<Option<InventoryRecord>> {
        let existing = self.list_addresses(subnet_id).await?;
        Ok(existing.into_iter().find(|r| {
            r.ip == record.ip
                && r.mac_address() == record.mac_address()
                && r.hostname == record.hostname
        }))
    }

    /// Overwrite the synced fields of address `id`.
    ///
    /// Fails with `IpamError::NotFound` when the record disappeared since it
    /// was listed.
    pub async fn update_address(
        &self,
        id: &AddressId,
        record: &InventoryRecord,
    ) -> IpamResult<InventoryRecord> {
        let payload = UpdatePayload {
            mac: record.mac.as_deref(),
            hostname: record.hostname.as_deref(),
            tag: record.status.map(|s| s.tag()),
        };
        self.put_address(id, &payload, "update_address").await?;

        tracing::info!(
            ip = %record.ip,
            id = %id,
            hostname = record.hostname.as_deref().unwrap_or(""),
            "Updated address"
        );

        Ok(InventoryRecord {
            id: Some(id.clone()),
            ..record.clone()
        })
    }

    /// Mark address `id` offline.
    pub async fn deactivate_address(&self, id: &AddressId) -> IpamResult<()> {
        let payload = TagPayload {
            tag: AddressStatus::Offline.tag(),
        };
        self.put_address(id, &payload, "deactivate_address").await?;
        tracing::info!(id = %id, "Deactivated address");
        Ok(())
    }

    async fn put_address<P: Serialize>(
        &self,
        id: &AddressId,
        payload: &P,
        operation: &str,
    ) -> IpamResult<()> {
        let url = self.api_url(&format!("addresses/{id}/"));
        self.retry
            .execute(operation, || async {
                let request = self.authorized(self.http().put(&url))?.json(payload);
                check_status(request.send().await?).await?;
                Ok::<_, IpamError>(())
            })
            .await
    }
}
