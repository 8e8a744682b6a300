//! Core domain types for leasesync.
//!
//! Observations come from the network appliance (DHCP leases and the ARP
//! table); records come from the address inventory. Both sides are keyed by
//! IPv4 address.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use ipnet::Ipv4Net;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ValidationError;

// ── MAC Address ───────────────────────────────────────────────────

/// A 48-bit hardware address.
///
/// Always rendered lower-case and colon-separated, so two addresses compare
/// equal regardless of the case or separator they were parsed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacAddress(mac_address::MacAddress);

impl MacAddress {
    pub fn new(octets: [u8; 6]) -> Self {
        Self(mac_address::MacAddress::new(octets))
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0.bytes()
    }

    /// Parse `aa:bb:cc:dd:ee:ff`, `AA-BB-CC-DD-EE-FF`, or `aabbccddeeff`.
    ///
    /// Single-digit octets (`0:1b:...`) are zero-padded. The all-zeros and
    /// broadcast addresses are rejected as placeholders.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::MissingMac);
        }
        let invalid = || ValidationError::InvalidMac(raw.to_string());

        // Octets must be one or two hex digits before the separated form is
        // handed to `mac_address`.
        let octets: Vec<String> = if trimmed.contains([':', '-']) {
            let parts: Vec<&str> = trimmed.split([':', '-']).collect();
            if parts.len() != 6 || !parts.iter().all(|p| is_hex_octet(p)) {
                return Err(invalid());
            }
            parts.iter().map(|p| format!("{p:0>2}")).collect()
        } else if trimmed.len() == 12 && trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
            (0..6).map(|i| trimmed[i * 2..i * 2 + 2].to_string()).collect()
        } else {
            return Err(invalid());
        };

        let inner: mac_address::MacAddress = octets.join(":").parse().map_err(|_| invalid())?;
        let mac = Self(inner);
        if mac.is_placeholder() {
            return Err(ValidationError::PlaceholderMac(raw.to_string()));
        }
        Ok(mac)
    }

    /// All-zeros (incomplete ARP entry) or broadcast.
    pub fn is_placeholder(&self) -> bool {
        let octets = self.octets();
        octets == [0x00; 6] || octets == [0xff; 6]
    }
}

fn is_hex_octet(part: &str) -> bool {
    (1..=2).contains(&part.len()) && part.chars().all(|c| c.is_ascii_hexdigit())
}

impl std::hash::Hash for MacAddress {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.octets().hash(state);
    }
}

impl PartialOrd for MacAddress {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MacAddress {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.octets().cmp(&other.octets())
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // `mac_address` renders upper-case; phpIPAM stores lower-case.
        let [a, b, c, d, e, g] = self.octets();
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl FromStr for MacAddress {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for MacAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MacAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

// ── Observations ──────────────────────────────────────────────────

/// Where an observation came from. Used for tie-breaking, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObservationSource {
    Lease,
    Arp,
    Merged,
}

/// One host seen on the network at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostObservation {
    pub ip: Ipv4Addr,
    /// Absent for ARP rows whose entry has expired.
    pub mac: Option<MacAddress>,
    /// Only DHCP leases carry a hostname.
    pub hostname: Option<String>,
    pub source: ObservationSource,
}

impl HostObservation {
    pub fn from_lease(ip: Ipv4Addr, mac: MacAddress, hostname: Option<String>) -> Self {
        Self {
            ip,
            mac: Some(mac),
            hostname,
            source: ObservationSource::Lease,
        }
    }

    pub fn from_arp(ip: Ipv4Addr, mac: Option<MacAddress>) -> Self {
        Self {
            ip,
            mac,
            hostname: None,
            source: ObservationSource::Arp,
        }
    }
}

// ── Inventory ─────────────────────────────────────────────────────

/// Opaque identifier assigned by the inventory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AddressId(pub String);

impl AddressId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AddressId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AddressId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Serialize for AddressId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for AddressId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // phpIPAM returns ids as strings on most endpoints and as numbers on some.
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(u64),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Text(s) => Ok(Self(s)),
            Raw::Number(n) => Ok(Self(n.to_string())),
        }
    }
}

/// Address status as defined by the inventory (phpIPAM "tag").
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressStatus {
    Offline,
    #[default]
    Used,
    Reserved,
    Dhcp,
    Other(u32),
}

impl AddressStatus {
    pub fn from_tag(tag: u32) -> Self {
        match tag {
            1 => Self::Offline,
            2 => Self::Used,
            3 => Self::Reserved,
            4 => Self::Dhcp,
            other => Self::Other(other),
        }
    }

    pub fn tag(&self) -> u32 {
        match self {
            Self::Offline => 1,
            Self::Used => 2,
            Self::Reserved => 3,
            Self::Dhcp => 4,
            Self::Other(tag) => *tag,
        }
    }
}

/// The inventory's view of one IP address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryRecord {
    /// `None` until the inventory has created the record.
    pub id: Option<AddressId>,
    pub ip: Ipv4Addr,
    /// Stored as the inventory returned it; see [`InventoryRecord::mac_address`].
    pub mac: Option<String>,
    pub hostname: Option<String>,
    pub description: Option<String>,
    /// `None` when the inventory row carried no readable tag.
    pub status: Option<AddressStatus>,
}

impl InventoryRecord {
    /// Desired record for an observation that has no inventory counterpart.
    pub fn from_observation(obs: &HostObservation) -> Self {
        Self {
            id: None,
            ip: obs.ip,
            mac: obs.mac.map(|m| m.to_string()),
            hostname: obs.hostname.clone(),
            description: None,
            status: Some(AddressStatus::Used),
        }
    }

    /// The stored MAC, if present and well-formed.
    pub fn mac_address(&self) -> Option<MacAddress> {
        self.mac.as_deref().and_then(|m| MacAddress::parse(m).ok())
    }
}

// ── Subnet ────────────────────────────────────────────────────────

/// The inventory subnet a run reconciles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubnetTarget {
    pub subnet_id: String,
    /// When set, observations outside this network are out of scope.
    pub cidr: Option<Ipv4Net>,
}

impl SubnetTarget {
    pub fn new(subnet_id: impl Into<String>) -> Self {
        Self {
            subnet_id: subnet_id.into(),
            cidr: None,
        }
    }

    pub fn with_cidr(mut self, cidr: Ipv4Net) -> Self {
        self.cidr = Some(cidr);
        self
    }

    /// Whether `ip` falls inside this target's scope.
    pub fn contains(&self, ip: &Ipv4Addr) -> bool {
        self.cidr.map_or(true, |net| net.contains(ip))
    }
}
