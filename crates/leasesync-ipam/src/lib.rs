//! leasesync-ipam: phpIPAM client for the address inventory.
//!
//! Every read and write against the inventory flows through this crate:
//! token exchange, subnet listing, and the create/update/deactivate calls
//! the reconciler issues. Transient failures are retried with the shared
//! backoff policy; races (conflict, not found) surface as typed errors.

pub mod client;
pub mod inventory;
pub mod mutations;
pub mod queries;

pub use client::{AuthToken, IpamClient, IpamConfig, IpamError, IpamResult, Scheme};
pub use inventory::AddressInventory;
