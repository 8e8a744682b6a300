//! leasesync-core: Shared types, configuration values, and error handling for leasesync.
//!
//! This crate provides the foundational types used across the leasesync crates:
//! - Host observations gathered from the network appliance
//! - Address records as seen by the inventory
//! - The error taxonomy used in run reports
//! - Shared configuration values (TLS verification, retry settings)
//! - The bounded exponential-backoff retry policy

pub mod config;
pub mod error;
pub mod retry;
pub mod types;

pub use error::{ErrorKind, ValidationError};
pub use retry::{RetryPolicy, Retryable};
pub use types::{
    AddressId, AddressStatus, HostObservation, InventoryRecord, MacAddress, ObservationSource,
    SubnetTarget,
};
