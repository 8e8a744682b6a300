//! Configuration values shared by the leasesync clients.
//!
//! Loading (file and environment layering) happens in the binary; these are
//! the typed values it hands to the clients.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Deserializer};

/// How a client verifies the server's TLS certificate.
///
/// Accepts a boolean, one of the strings `true/false/yes/no/1/0`, or a path
/// to a PEM trust bundle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum VerifyTls {
    #[default]
    Enabled,
    Disabled,
    CaBundle(PathBuf),
}

impl VerifyTls {
    pub fn from_text(raw: &str) -> Self {
        let trimmed = raw.trim();
        match trimmed.to_lowercase().as_str() {
            "" | "true" | "yes" | "1" => Self::Enabled,
            "false" | "no" | "0" => Self::Disabled,
            _ => Self::CaBundle(PathBuf::from(trimmed)),
        }
    }
}

impl<'de> Deserialize<'de> for VerifyTls {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Flag(bool),
            Number(i64),
            Text(String),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Flag(true) => Self::Enabled,
            Raw::Flag(false) => Self::Disabled,
            Raw::Number(0) => Self::Disabled,
            Raw::Number(_) => Self::Enabled,
            Raw::Text(s) => Self::from_text(&s),
        })
    }
}

/// Retry bounds for transient failures.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct RetrySettings {
    /// Retries after the first attempt (0 = no retries).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl RetrySettings {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify_tls_from_json() {
        let parse = |s: &str| serde_json::from_str::<VerifyTls>(s).unwrap();
        assert_eq!(parse("true"), VerifyTls::Enabled);
        assert_eq!(parse("false"), VerifyTls::Disabled);
        assert_eq!(parse("0"), VerifyTls::Disabled);
        assert_eq!(parse("\"no\""), VerifyTls::Disabled);
        assert_eq!(parse("\"TRUE\""), VerifyTls::Enabled);
        assert_eq!(
            parse("\"/etc/ssl/fw-ca.pem\""),
            VerifyTls::CaBundle(PathBuf::from("/etc/ssl/fw-ca.pem"))
        );
    }

    #[test]
    fn test_retry_settings_defaults() {
        let settings: RetrySettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings, RetrySettings::default());
        assert_eq!(settings.base_delay(), Duration::from_secs(1));
        assert_eq!(settings.max_delay(), Duration::from_secs(30));
        assert_eq!(settings.max_retries, 3);
    }
}
