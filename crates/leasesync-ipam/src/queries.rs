//! Read operations against the phpIPAM address inventory.

use std::net::IpAddr;

use leasesync_core::{AddressId, AddressStatus, InventoryRecord};
use serde::Deserialize;

use crate::client::{check_status, Envelope, IpamClient, IpamError, IpamResult};

/// One address row as phpIPAM returns it.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct AddressRow {
    pub id: AddressId,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub mac: Option<String>,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Status id; phpIPAM sends it as a string or a number.
    #[serde(default)]
    pub tag: Option<serde_json::Value>,
}

impl AddressRow {
    /// Convert to the domain record. Rows without a usable IPv4 address
    /// yield `None`.
    pub(crate) fn into_record(self) -> Option<InventoryRecord> {
        let raw_ip = non_empty(self.ip)?;
        let ip = match raw_ip.parse::<IpAddr>() {
            Ok(IpAddr::V4(v4)) => v4,
            Ok(IpAddr::V6(_)) => {
                tracing::warn!(ip = %raw_ip, id = %self.id, "Skipping non-IPv4 inventory record");
                return None;
            }
            Err(_) => {
                tracing::warn!(ip = %raw_ip, id = %self.id, "Skipping inventory record with invalid IP");
                return None;
            }
        };

        Some(InventoryRecord {
            id: Some(self.id),
            ip,
            mac: non_empty(self.mac),
            hostname: non_empty(self.hostname),
            description: non_empty(self.description),
            status: self.tag.as_ref().and_then(parse_tag),
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_tag(value: &serde_json::Value) -> Option<AddressStatus> {
    let tag = match value {
        serde_json::Value::Number(n) => n.as_u64()?,
        serde_json::Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    u32::try_from(tag).ok().map(AddressStatus::from_tag)
}

impl IpamClient {
    /// List every address currently recorded in `subnet_id`.
    ///
    /// phpIPAM answers 404 for a subnet with no addresses; that is returned as
    /// an empty list.
    pub async fn list_addresses(&self, subnet_id: &str) -> IpamResult<Vec<InventoryRecord>> {
        self.retry
            .execute("list_addresses", || self.list_addresses_once(subnet_id))
            .await
    }

    async fn list_addresses_once(&self, subnet_id: &str) -> IpamResult<Vec<InventoryRecord>> {
        let url = self.api_url(&format!("subnets/{subnet_id}/addresses/"));
        let response = self.authorized(self.http().get(url))?.send().await?;

        let response = match check_status(response).await {
            Ok(r) => r,
            Err(IpamError::NotFound(_)) => {
                tracing::debug!(subnet_id, "Subnet has no addresses");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };

        let body: Envelope<Vec<serde_json::Value>> = response.json().await?;
        let rows = body.data.unwrap_or_default();
        let total = rows.len();

        let records: Vec<InventoryRecord> = rows
            .into_iter()
            .filter_map(|row| match serde_json::from_value::<AddressRow>(row) {
                Ok(r) => r.into_record(),
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping undecodable inventory row");
                    None
                }
            })
            .collect();

        tracing::debug!(
            subnet_id,
            rows = total,
            records = records.len(),
            "Listed inventory addresses"
        );
        Ok(records)
    }
}
