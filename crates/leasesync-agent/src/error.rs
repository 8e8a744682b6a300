//! Error types for the leasesync-agent crate.

use leasesync_core::{ErrorKind, Retryable};
use leasesync_ipam::IpamError;
use thiserror::Error;

/// Failures talking to the network appliance. All of them abort the run.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Appliance returned HTTP {status} for {endpoint}")]
    Status { endpoint: &'static str, status: u16 },

    #[error("Appliance request to {endpoint} failed: {detail}")]
    Transport {
        endpoint: &'static str,
        detail: String,
    },

    #[error("Malformed response from {endpoint}: {detail}")]
    Malformed {
        endpoint: &'static str,
        detail: String,
    },

    #[error("TLS configuration error: {0}")]
    Tls(String),

    #[error("Gave up after {attempts} attempt(s): {message}")]
    RetriesExhausted { attempts: u32, message: String },
}

impl Retryable for SourceError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Status { status, .. } => *status >= 500 || *status == 429,
            Self::Transport { .. } => true,
            _ => false,
        }
    }

    fn exhausted(self, attempts: u32) -> Self {
        Self::RetriesExhausted {
            attempts,
            message: self.to_string(),
        }
    }
}

pub type SourceResult<T> = std::result::Result<T, SourceError>;

/// Errors that abort a reconciliation run before or instead of applying it.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Inventory authentication failed: {0}")]
    Auth(#[source] IpamError),

    #[error("Appliance fetch failed: {0}")]
    Fetch(#[from] SourceError),

    #[error("Inventory read failed: {0}")]
    InventoryRead(#[source] IpamError),
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) => ErrorKind::Config,
            Self::Auth(_) => ErrorKind::Auth,
            Self::Fetch(_) | Self::InventoryRead(_) => ErrorKind::Fetch,
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_error_transience() {
        let server = SourceError::Status {
            endpoint: "leases",
            status: 502,
        };
        let denied = SourceError::Status {
            endpoint: "leases",
            status: 401,
        };
        let malformed = SourceError::Malformed {
            endpoint: "arp",
            detail: "not a list".into(),
        };
        assert!(server.is_transient());
        assert!(!denied.is_transient());
        assert!(!malformed.is_transient());
    }

    #[test]
    fn test_sync_error_kinds_are_fatal() {
        let fetch = SyncError::Fetch(SourceError::Tls("bad pem".into()));
        let auth = SyncError::Auth(IpamError::Auth("denied".into()));
        let read = SyncError::InventoryRead(IpamError::Transient("timeout".into()));
        assert_eq!(fetch.kind(), ErrorKind::Fetch);
        assert_eq!(auth.kind(), ErrorKind::Auth);
        assert_eq!(read.kind(), ErrorKind::Fetch);
        assert!(fetch.kind().is_fatal() && auth.kind().is_fatal() && read.kind().is_fatal());
    }
}
