//! OPNsense API payload decoding.
//!
//! The appliance returns DHCP leases wrapped in a `{"rows": [...]}` search
//! envelope and the ARP table as a bare array. Rows are decoded one by one
//! so a single malformed row is dropped instead of failing the fetch.

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr};

use leasesync_core::{HostObservation, MacAddress, ObservationSource, ValidationError};
use serde::Deserialize;
use serde_json::Value;

pub const LEASES_ENDPOINT: &str = "/api/dhcpv4/leases/searchLease";
pub const ARP_ENDPOINT: &str = "/api/diagnostics/interface/getArp";

/// Lease states that mean the address is no longer bound.
const INACTIVE_LEASE_STATES: &[&str] = &["expired", "free", "released", "abandoned"];

/// A DHCPv4 lease row from `searchLease`.
#[derive(Debug, Clone, Deserialize)]
pub struct LeaseRow {
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub mac: Option<String>,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub ends: Option<String>,
}

/// An ARP table row from `getArp`.
#[derive(Debug, Clone, Deserialize)]
pub struct ArpRow {
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub mac: Option<String>,
    #[serde(default)]
    pub intf: Option<String>,
    #[serde(default)]
    pub expired: bool,
}

/// A source row dropped at ingestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedRow {
    pub source: ObservationSource,
    pub ip: Option<String>,
    pub reason: ValidationError,
}

/// Observations decoded from one source, plus the rows that were dropped.
#[derive(Debug, Clone, Default)]
pub struct ObservationBatch {
    pub observations: Vec<HostObservation>,
    pub rejected: Vec<RejectedRow>,
}

impl ObservationBatch {
    fn push(&mut self, seen: &mut HashSet<Ipv4Addr>, obs: HostObservation) {
        // First row for an IP wins.
        if seen.insert(obs.ip) {
            self.observations.push(obs);
        } else {
            tracing::debug!(ip = %obs.ip, source = ?obs.source, "Ignoring duplicate row");
        }
    }

    fn reject(&mut self, source: ObservationSource, ip: Option<String>, reason: ValidationError) {
        tracing::warn!(
            source = ?source,
            ip = ip.as_deref().unwrap_or(""),
            reason = %reason,
            "Dropping malformed row"
        );
        self.rejected.push(RejectedRow { source, ip, reason });
    }
}

/// Extract the row array from a `searchLease` response.
pub fn lease_rows(body: Value) -> Result<Vec<Value>, String> {
    match body {
        Value::Object(mut map) => match map.remove("rows") {
            Some(Value::Array(rows)) => Ok(rows),
            Some(_) => Err("`rows` is not an array".to_string()),
            None => Err("response has no `rows` field".to_string()),
        },
        _ => Err("response is not a JSON object".to_string()),
    }
}

/// Extract the row array from a `getArp` response.
///
/// Older releases return a bare array; newer ones wrap it like a search.
pub fn arp_rows(body: Value) -> Result<Vec<Value>, String> {
    match body {
        Value::Array(rows) => Ok(rows),
        Value::Object(mut map) => match map.remove("rows") {
            Some(Value::Array(rows)) => Ok(rows),
            _ => Err("response is neither an array nor a row envelope".to_string()),
        },
        _ => Err("response is neither an array nor a row envelope".to_string()),
    }
}

pub fn parse_leases(rows: Vec<Value>) -> ObservationBatch {
    let mut batch = ObservationBatch::default();
    let mut seen = HashSet::new();

    for value in rows {
        let row: LeaseRow = match decode_row(value) {
            Ok(r) => r,
            Err(reason) => {
                batch.reject(ObservationSource::Lease, None, reason);
                continue;
            }
        };

        if let Some(state) = row.state.as_deref() {
            if INACTIVE_LEASE_STATES.contains(&state.trim().to_lowercase().as_str()) {
                tracing::debug!(
                    ip = row.address.as_deref().unwrap_or(""),
                    state,
                    ends = row.ends.as_deref().unwrap_or(""),
                    "Skipping inactive lease"
                );
                continue;
            }
        }

        match lease_observation(&row) {
            Ok(obs) => batch.push(&mut seen, obs),
            Err(reason) => batch.reject(ObservationSource::Lease, row.address, reason),
        }
    }

    batch
}

pub fn parse_arp(rows: Vec<Value>) -> ObservationBatch {
    let mut batch = ObservationBatch::default();
    let mut seen = HashSet::new();

    for value in rows {
        let row: ArpRow = match decode_row(value) {
            Ok(r) => r,
            Err(reason) => {
                batch.reject(ObservationSource::Arp, None, reason);
                continue;
            }
        };

        match arp_observation(&row) {
            Ok(obs) => batch.push(&mut seen, obs),
            Err(reason) => batch.reject(ObservationSource::Arp, row.ip, reason),
        }
    }

    batch
}

fn decode_row<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, ValidationError> {
    if !value.is_object() {
        return Err(ValidationError::NotAnObject);
    }
    serde_json::from_value(value).map_err(|e| ValidationError::Undecodable(e.to_string()))
}

fn lease_observation(row: &LeaseRow) -> Result<HostObservation, ValidationError> {
    let ip = parse_ipv4(row.address.as_deref())?;
    let mac = MacAddress::parse(row.mac.as_deref().unwrap_or(""))?;
    Ok(HostObservation::from_lease(
        ip,
        mac,
        clean_hostname(row.hostname.as_deref()),
    ))
}

fn arp_observation(row: &ArpRow) -> Result<HostObservation, ValidationError> {
    let ip = parse_ipv4(row.ip.as_deref())?;
    if row.expired {
        // The host was seen, but the MAC binding is stale and often blank.
        tracing::debug!(
            ip = %ip,
            intf = row.intf.as_deref().unwrap_or(""),
            "ARP entry expired, keeping IP only"
        );
        return Ok(HostObservation::from_arp(ip, None));
    }
    let mac = MacAddress::parse(row.mac.as_deref().unwrap_or(""))?;
    Ok(HostObservation::from_arp(ip, Some(mac)))
}

fn parse_ipv4(raw: Option<&str>) -> Result<Ipv4Addr, ValidationError> {
    let raw = raw.map(str::trim).filter(|s| !s.is_empty());
    let raw = raw.ok_or(ValidationError::MissingIp)?;
    match raw.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => Ok(v4),
        Ok(IpAddr::V6(_)) => Err(ValidationError::NotIpv4(raw.to_string())),
        Err(_) => Err(ValidationError::InvalidIp(raw.to_string())),
    }
}

/// DHCP clients that send no name show up as empty or `*`.
fn clean_hostname(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|h| !h.is_empty() && *h != "*")
        .map(String::from)
}
