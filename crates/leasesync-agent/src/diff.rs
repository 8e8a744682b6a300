//! Change detection: diff merged observations against the inventory's
//! records for one subnet.

use std::collections::HashMap;
use std::fmt;
use std::net::Ipv4Addr;

use leasesync_core::{AddressStatus, HostObservation, InventoryRecord, SubnetTarget};
use serde::Serialize;

use crate::merge::HostMap;

#[derive(Debug, Clone, Copy, Default)]
pub struct PlanOptions {
    /// Mark unobserved records offline and bring observed ones back.
    pub enable_deactivation: bool,
}

/// The write an inventory record needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Create,
    Update,
    Deactivate,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Deactivate => "deactivate",
        })
    }
}

/// One observed host and the record it should end up as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedChange {
    pub observation: HostObservation,
    pub existing: Option<InventoryRecord>,
    pub desired: InventoryRecord,
}

/// The outcome of diffing one run's observations against the inventory.
#[derive(Debug, Clone, Default)]
pub struct ReconciliationPlan {
    pub create: Vec<PlannedChange>,
    pub update: Vec<PlannedChange>,
    pub unchanged: Vec<PlannedChange>,
    pub deactivate: Vec<InventoryRecord>,
}

impl ReconciliationPlan {
    /// Number of write calls applying this plan would issue.
    pub fn write_count(&self) -> usize {
        self.create.len() + self.update.len() + self.deactivate.len()
    }
}

/// Compute the changes that bring `existing` in line with `observations`.
///
/// Existing records outside the target's CIDR are ignored. When the
/// inventory holds several records for one IP, the first is used.
pub fn plan(
    observations: &HostMap,
    existing: Vec<InventoryRecord>,
    target: &SubnetTarget,
    options: PlanOptions,
) -> ReconciliationPlan {
    let mut by_ip: HashMap<Ipv4Addr, InventoryRecord> = HashMap::with_capacity(existing.len());
    let mut order: Vec<Ipv4Addr> = Vec::with_capacity(existing.len());

    for record in existing {
        if !target.contains(&record.ip) {
            continue;
        }
        if by_ip.contains_key(&record.ip) {
            tracing::warn!(
                ip = %record.ip,
                id = record.id.as_ref().map(|id| id.as_str()).unwrap_or(""),
                "Duplicate inventory record, ignoring"
            );
            continue;
        }
        order.push(record.ip);
        by_ip.insert(record.ip, record);
    }

    let mut result = ReconciliationPlan::default();

    for (ip, obs) in observations {
        match by_ip.remove(ip) {
            None => result.create.push(PlannedChange {
                observation: obs.clone(),
                existing: None,
                desired: InventoryRecord::from_observation(obs),
            }),
            Some(record) => {
                let desired = desired_record(obs, &record, options);
                let change = PlannedChange {
                    observation: obs.clone(),
                    existing: Some(record),
                    desired,
                };
                if needs_update(&change) {
                    result.update.push(change);
                } else {
                    result.unchanged.push(change);
                }
            }
        }
    }

    // Whatever is left was not observed this run.
    if options.enable_deactivation {
        for ip in order {
            let Some(record) = by_ip.remove(&ip) else {
                continue;
            };
            if record.status == Some(AddressStatus::Offline) {
                continue;
            }
            if record.id.is_none() {
                tracing::warn!(ip = %record.ip, "Unobserved record has no id, cannot deactivate");
                continue;
            }
            result.deactivate.push(record);
        }
    }

    tracing::debug!(
        create = result.create.len(),
        update = result.update.len(),
        unchanged = result.unchanged.len(),
        deactivate = result.deactivate.len(),
        "Reconciliation plan computed"
    );

    result
}

/// The existing record with the observation's fields applied.
///
/// Only fields the observation carries are asserted; inventory-owned fields
/// ride along untouched.
fn desired_record(
    obs: &HostObservation,
    existing: &InventoryRecord,
    options: PlanOptions,
) -> InventoryRecord {
    let mut desired = existing.clone();

    if let Some(mac) = obs.mac {
        if existing.mac_address() != Some(mac) {
            desired.mac = Some(mac.to_string());
        }
    }

    if let Some(hostname) = &obs.hostname {
        if existing.hostname.as_deref() != Some(hostname.as_str()) {
            desired.hostname = Some(hostname.clone());
        }
    }

    if options.enable_deactivation && existing.status == Some(AddressStatus::Offline) {
        desired.status = Some(AddressStatus::Used);
    }

    desired
}

fn needs_update(change: &PlannedChange) -> bool {
    match &change.existing {
        Some(existing) => {
            existing.mac != change.desired.mac
                || existing.hostname != change.desired.hostname
                || existing.status != change.desired.status
        }
        None => true,
    }
}
