//! Combine lease and ARP observations into one view per IP.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use leasesync_core::{HostObservation, ObservationSource, SubnetTarget};

/// Merged observations keyed by IP. Ordered so logs and reports are stable.
pub type HostMap = BTreeMap<Ipv4Addr, HostObservation>;

/// Merge ARP entries with DHCP leases.
///
/// ARP is loaded first, then each lease is overlaid by IP. A lease's MAC and
/// hostname replace the ARP values whenever the lease carries them, so the
/// lease wins on MAC disagreement.
pub fn merge(leases: Vec<HostObservation>, arp: Vec<HostObservation>) -> HostMap {
    let mut hosts = HostMap::new();

    for obs in arp {
        // Sources are already de-duplicated; keep the first if not.
        hosts.entry(obs.ip).or_insert(obs);
    }

    for lease in leases {
        match hosts.entry(lease.ip) {
            Entry::Vacant(slot) => {
                slot.insert(lease);
            }
            Entry::Occupied(mut slot) => {
                let host = slot.get_mut();
                // Already overlaid by an earlier lease.
                if host.source != ObservationSource::Arp {
                    continue;
                }
                if let (Some(seen), Some(leased)) = (host.mac, lease.mac) {
                    if seen != leased {
                        tracing::debug!(
                            ip = %lease.ip,
                            arp_mac = %seen,
                            lease_mac = %leased,
                            "ARP and lease disagree on MAC, using lease"
                        );
                    }
                }
                if lease.mac.is_some() {
                    host.mac = lease.mac;
                }
                if lease.hostname.is_some() {
                    host.hostname = lease.hostname;
                }
                host.source = ObservationSource::Merged;
            }
        }
    }

    hosts
}

/// Drop observations that fall outside the target network.
pub fn scope_to_subnet(hosts: HostMap, target: &SubnetTarget) -> HostMap {
    if target.cidr.is_none() {
        return hosts;
    }

    let before = hosts.len();
    let scoped: HostMap = hosts
        .into_iter()
        .filter(|(ip, _)| target.contains(ip))
        .collect();

    let dropped = before - scoped.len();
    if dropped > 0 {
        tracing::debug!(
            subnet_id = %target.subnet_id,
            dropped,
            "Ignoring observations outside subnet"
        );
    }
    scoped
}

#[cfg(test)]
mod tests {
    use super::*;
    use leasesync_core::MacAddress;

    fn mac(s: &str) -> MacAddress {
        MacAddress::parse(s).unwrap()
    }

    fn lease(ip: [u8; 4], m: &str, hostname: Option<&str>) -> HostObservation {
        HostObservation::from_lease(Ipv4Addr::from(ip), mac(m), hostname.map(String::from))
    }

    fn arp(ip: [u8; 4], m: Option<&str>) -> HostObservation {
        HostObservation::from_arp(Ipv4Addr::from(ip), m.map(mac))
    }

    #[test]
    fn test_lease_wins_on_mac_disagreement() {
        let hosts = merge(
            vec![lease([10, 0, 0, 5], "BB:BB:BB:BB:BB:BB", Some("foo"))],
            vec![arp([10, 0, 0, 5], Some("AA:AA:AA:AA:AA:AA"))],
        );

        assert_eq!(hosts.len(), 1);
        let host = &hosts[&Ipv4Addr::new(10, 0, 0, 5)];
        assert_eq!(host.mac, Some(mac("bb:bb:bb:bb:bb:bb")));
        assert_eq!(host.hostname.as_deref(), Some("foo"));
        assert_eq!(host.source, ObservationSource::Merged);
    }

    #[test]
    fn test_lease_fills_expired_arp_mac() {
        let hosts = merge(
            vec![lease([10, 0, 0, 6], "cc:cc:cc:cc:cc:cc", None)],
            vec![arp([10, 0, 0, 6], None)],
        );
        let host = &hosts[&Ipv4Addr::new(10, 0, 0, 6)];
        assert_eq!(host.mac, Some(mac("cc:cc:cc:cc:cc:cc")));
        assert_eq!(host.hostname, None);
    }

    #[test]
    fn test_disjoint_sources_keep_provenance() {
        let hosts = merge(
            vec![lease([10, 0, 0, 1], "aa:aa:aa:aa:aa:01", Some("a"))],
            vec![arp([10, 0, 0, 2], Some("aa:aa:aa:aa:aa:02"))],
        );
        assert_eq!(hosts.len(), 2);
        assert_eq!(
            hosts[&Ipv4Addr::new(10, 0, 0, 1)].source,
            ObservationSource::Lease
        );
        assert_eq!(
            hosts[&Ipv4Addr::new(10, 0, 0, 2)].source,
            ObservationSource::Arp
        );
    }

    #[test]
    fn test_duplicate_lease_does_not_override_first() {
        let hosts = merge(
            vec![
                lease([10, 0, 0, 3], "aa:aa:aa:aa:aa:03", Some("first")),
                lease([10, 0, 0, 3], "aa:aa:aa:aa:aa:33", Some("second")),
            ],
            vec![],
        );
        assert_eq!(
            hosts[&Ipv4Addr::new(10, 0, 0, 3)].hostname.as_deref(),
            Some("first")
        );
    }

    #[test]
    fn test_empty_inputs() {
        assert!(merge(vec![], vec![]).is_empty());
    }

    #[test]
    fn test_scope_to_subnet() {
        let hosts = merge(
            vec![
                lease([192, 168, 1, 10], "aa:aa:aa:aa:aa:10", None),
                lease([192, 168, 2, 10], "aa:aa:aa:aa:aa:20", None),
            ],
            vec![],
        );

        let unscoped = scope_to_subnet(hosts.clone(), &SubnetTarget::new("3"));
        assert_eq!(unscoped.len(), 2);

        let target = SubnetTarget::new("3").with_cidr("192.168.1.0/24".parse().unwrap());
        let scoped = scope_to_subnet(hosts, &target);
        assert_eq!(scoped.len(), 1);
        assert!(scoped.contains_key(&Ipv4Addr::new(192, 168, 1, 10)));
    }
}
