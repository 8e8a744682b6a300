use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification of every failure a run can report.
///
/// `Auth`, `Fetch`, `Config` and `Internal` abort a run. The per-record
/// kinds are counted in the run report while the remaining records continue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Auth,
    Fetch,
    Conflict,
    NotFound,
    Transient,
    Rejected,
    Validation,
    Config,
    /// A target's task died without producing a result.
    Internal,
}

impl ErrorKind {
    /// Whether an error of this kind aborts the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Auth | Self::Fetch | Self::Config | Self::Internal)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Auth => "auth",
            Self::Fetch => "fetch",
            Self::Conflict => "conflict",
            Self::NotFound => "not_found",
            Self::Transient => "transient",
            Self::Rejected => "rejected",
            Self::Validation => "validation",
            Self::Config => "config",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Reasons a source row is dropped at ingestion.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("row is not a JSON object")]
    NotAnObject,

    #[error("undecodable row: {0}")]
    Undecodable(String),

    #[error("row has no IP address")]
    MissingIp,

    #[error("invalid IP address: {0}")]
    InvalidIp(String),

    #[error("not an IPv4 address: {0}")]
    NotIpv4(String),

    #[error("row has no MAC address")]
    MissingMac,

    #[error("invalid MAC address: {0}")]
    InvalidMac(String),

    #[error("placeholder MAC address: {0}")]
    PlaceholderMac(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_kinds() {
        assert!(ErrorKind::Auth.is_fatal());
        assert!(ErrorKind::Fetch.is_fatal());
        assert!(!ErrorKind::Conflict.is_fatal());
        assert!(!ErrorKind::NotFound.is_fatal());
        assert!(!ErrorKind::Transient.is_fatal());
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::NotFound).unwrap();
        assert_eq!(json, "\"not_found\"");
        assert_eq!(ErrorKind::NotFound.to_string(), "not_found");
    }
}
