//! Configuration for the leasesync agent.

use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use ipnet::Ipv4Net;
use leasesync_core::config::{RetrySettings, VerifyTls};
use leasesync_core::{RetryPolicy, SubnetTarget};
use leasesync_ipam::{IpamConfig, Scheme};
use serde::Deserialize;

use crate::error::{Result, SyncError};
use crate::source::ApplianceConfig;

/// Top-level sync configuration.
///
/// Loaded from `leasesync.toml` `[sync]` section or
/// `LEASESYNC__SYNC__` environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Maximum inventory writes in flight during apply.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,

    /// Timeout for every HTTP request, in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default)]
    pub retry: RetrySettings,

    /// Targets declared in the config file.
    #[serde(default)]
    pub targets: Vec<TargetConfig>,

    /// A single target, convenient to supply through environment variables.
    #[serde(default)]
    pub target: Option<TargetConfig>,
}

/// One appliance → subnet pairing. Each target runs in isolation.
#[derive(Clone, Deserialize)]
pub struct TargetConfig {
    /// Label used in logs and reports.
    #[serde(default)]
    pub name: Option<String>,

    pub appliance_host: String,
    pub appliance_key: String,
    pub appliance_secret: String,

    /// `true`, `false`, or a path to a PEM trust bundle.
    #[serde(default)]
    pub verify_tls: VerifyTls,

    pub inventory_host: String,

    #[serde(default)]
    pub inventory_scheme: Scheme,

    pub inventory_app_id: String,
    pub inventory_app_code: String,
    pub subnet_id: String,

    /// Observations outside this network are ignored.
    #[serde(default)]
    pub subnet_cidr: Option<Ipv4Net>,

    /// Mark inventory records offline when their host is no longer observed.
    #[serde(default)]
    pub enable_deactivation: bool,
}

impl fmt::Debug for TargetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetConfig")
            .field("name", &self.name)
            .field("appliance_host", &self.appliance_host)
            .field("verify_tls", &self.verify_tls)
            .field("inventory_host", &self.inventory_host)
            .field("inventory_scheme", &self.inventory_scheme)
            .field("inventory_app_id", &self.inventory_app_id)
            .field("subnet_id", &self.subnet_id)
            .field("subnet_cidr", &self.subnet_cidr)
            .field("enable_deactivation", &self.enable_deactivation)
            .finish_non_exhaustive()
    }
}

impl TargetConfig {
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("{}/{}", self.appliance_host, self.subnet_id))
    }

    pub fn subnet_target(&self) -> SubnetTarget {
        SubnetTarget {
            subnet_id: self.subnet_id.clone(),
            cidr: self.subnet_cidr,
        }
    }

    pub fn appliance_config(&self, sync: &SyncConfig) -> ApplianceConfig {
        ApplianceConfig {
            host: self.appliance_host.clone(),
            key: self.appliance_key.clone(),
            secret: self.appliance_secret.clone(),
            verify_tls: self.verify_tls.clone(),
            timeout: sync.request_timeout(),
            retry: sync.retry_policy(),
        }
    }

    pub fn ipam_config(&self, sync: &SyncConfig) -> IpamConfig {
        IpamConfig {
            host: self.inventory_host.clone(),
            scheme: self.inventory_scheme,
            app_id: self.inventory_app_id.clone(),
            app_code: self.inventory_app_code.clone(),
            timeout: sync.request_timeout(),
            retry: sync.retry_policy(),
        }
    }

    fn validate(&self) -> Result<()> {
        let required = [
            ("appliance_host", &self.appliance_host),
            ("appliance_key", &self.appliance_key),
            ("appliance_secret", &self.appliance_secret),
            ("inventory_host", &self.inventory_host),
            ("inventory_app_id", &self.inventory_app_id),
            ("inventory_app_code", &self.inventory_app_code),
            ("subnet_id", &self.subnet_id),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(SyncError::Config(format!(
                    "target {}: {field} must not be empty",
                    self.display_name()
                )));
            }
        }
        Ok(())
    }
}

fn default_max_in_flight() -> usize {
    4
}

fn default_request_timeout() -> u64 {
    10
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_in_flight: default_max_in_flight(),
            request_timeout_secs: default_request_timeout(),
            retry: RetrySettings::default(),
            targets: Vec::new(),
            target: None,
        }
    }
}

impl SyncConfig {
    /// Load `[sync]` from `<file_prefix>.toml` (optional) layered under
    /// `LEASESYNC__*` environment variables.
    pub fn load(file_prefix: &str) -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::File::with_name(file_prefix).required(false))
            .add_source(
                config::Environment::with_prefix("LEASESYNC")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| SyncError::Config(e.to_string()))?;

        match cfg.get::<SyncConfig>("sync") {
            Ok(c) => Ok(c),
            Err(config::ConfigError::NotFound(_)) => Ok(SyncConfig::default()),
            Err(e) => Err(SyncError::Config(e.to_string())),
        }
    }

    /// Every configured target: the file's list followed by the single
    /// environment-supplied target, if any.
    pub fn all_targets(&self) -> Vec<TargetConfig> {
        self.targets
            .iter()
            .chain(self.target.iter())
            .cloned()
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_in_flight == 0 {
            return Err(SyncError::Config("max_in_flight must be at least 1".into()));
        }
        if self.request_timeout_secs == 0 {
            return Err(SyncError::Config(
                "request_timeout_secs must be at least 1".into(),
            ));
        }

        let targets = self.all_targets();
        if targets.is_empty() {
            return Err(SyncError::Config("no sync targets configured".into()));
        }

        let mut names = HashSet::new();
        for target in &targets {
            target.validate()?;
            if !names.insert(target.display_name()) {
                return Err(SyncError::Config(format!(
                    "duplicate target name: {}",
                    target.display_name()
                )));
            }
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from_settings(&self.retry)
    }
}
