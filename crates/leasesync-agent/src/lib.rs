//! leasesync-agent: Reconciles what an OPNsense appliance sees on the
//! network into the phpIPAM address inventory.
//!
//! Fetches DHCP leases and the ARP table, merges them per IP, diffs the
//! result against the inventory's subnet, and applies the difference.

pub mod apply;
pub mod config;
pub mod diff;
pub mod error;
pub mod merge;
pub mod opnsense;
pub mod report;
pub mod runner;
pub mod source;
