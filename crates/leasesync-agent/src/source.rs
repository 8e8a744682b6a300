//! Appliance HTTP client.
//!
//! Fetches DHCP leases and the ARP table from the OPNsense REST API using
//! key/secret basic auth. Transient failures go through the shared retry
//! policy; everything else is returned as-is and aborts the run.

use std::fmt;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use leasesync_core::config::VerifyTls;
use leasesync_core::RetryPolicy;
use reqwest::{Certificate, Client};
use serde_json::Value;

use crate::error::{SourceError, SourceResult};
use crate::opnsense::{self, ObservationBatch, ARP_ENDPOINT, LEASES_ENDPOINT};

/// Anything that can report which hosts are currently on the network.
#[async_trait]
pub trait HostSource: Send + Sync {
    /// Active DHCPv4 leases.
    async fn fetch_leases(&self) -> SourceResult<ObservationBatch>;

    /// The current ARP table.
    async fn fetch_arp(&self) -> SourceResult<ObservationBatch>;
}

/// Connection settings for one appliance.
#[derive(Clone)]
pub struct ApplianceConfig {
    pub host: String,
    pub key: String,
    pub secret: String,
    pub verify_tls: VerifyTls,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl fmt::Debug for ApplianceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApplianceConfig")
            .field("host", &self.host)
            .field("verify_tls", &self.verify_tls)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// OPNsense API client.
pub struct ApplianceClient {
    base_url: String,
    key: String,
    secret: String,
    http: Client,
    retry: RetryPolicy,
}

impl ApplianceClient {
    pub fn new(config: &ApplianceConfig) -> SourceResult<Self> {
        let mut builder = Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("leasesync/", env!("CARGO_PKG_VERSION")));

        match &config.verify_tls {
            VerifyTls::Enabled => {}
            VerifyTls::Disabled => {
                tracing::warn!(
                    host = %config.host,
                    "TLS verification disabled for appliance"
                );
                builder = builder.danger_accept_invalid_certs(true);
            }
            VerifyTls::CaBundle(path) => {
                let pem = std::fs::read(path).map_err(|e| {
                    SourceError::Tls(format!("cannot read {}: {e}", path.display()))
                })?;
                let cert = Certificate::from_pem(&pem).map_err(|e| {
                    SourceError::Tls(format!("invalid PEM in {}: {e}", path.display()))
                })?;
                builder = builder
                    .tls_built_in_root_certs(false)
                    .add_root_certificate(cert);
            }
        }

        let http = builder
            .build()
            .map_err(|e| SourceError::Tls(format!("failed to build HTTP client: {e}")))?;

        let host = config.host.trim_end_matches('/');
        let base_url = if host.contains("://") {
            host.to_string()
        } else {
            format!("https://{host}")
        };

        Ok(Self::with_http_client(
            base_url,
            &config.key,
            &config.secret,
            http,
            config.retry.clone(),
        ))
    }

    /// Create a client with a pre-built `reqwest::Client` (for testing).
    pub fn with_http_client(
        base_url: impl Into<String>,
        key: &str,
        secret: &str,
        http: Client,
        retry: RetryPolicy,
    ) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            key: key.to_string(),
            secret: secret.to_string(),
            http,
            retry,
        }
    }

    async fn get_json(&self, endpoint: &'static str) -> SourceResult<Value> {
        let start = Instant::now();
        let body = self
            .retry
            .execute(endpoint, || self.get_once(endpoint))
            .await?;
        tracing::debug!(
            endpoint,
            duration_ms = start.elapsed().as_millis() as u64,
            "Appliance request complete"
        );
        Ok(body)
    }

    async fn get_once(&self, endpoint: &'static str) -> SourceResult<Value> {
        let url = format!("{}{}", self.base_url, endpoint);
        let response = self
            .http
            .get(&url)
            .basic_auth(&self.key, Some(&self.secret))
            .send()
            .await
            .map_err(|e| SourceError::Transport {
                endpoint,
                detail: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status {
                endpoint,
                status: status.as_u16(),
            });
        }

        let text = response.text().await.map_err(|e| SourceError::Transport {
            endpoint,
            detail: e.to_string(),
        })?;
        serde_json::from_str(&text).map_err(|e| SourceError::Malformed {
            endpoint,
            detail: format!("invalid JSON: {e}"),
        })
    }
}

#[async_trait]
impl HostSource for ApplianceClient {
    async fn fetch_leases(&self) -> SourceResult<ObservationBatch> {
        let body = self.get_json(LEASES_ENDPOINT).await?;
        let rows = opnsense::lease_rows(body).map_err(|detail| SourceError::Malformed {
            endpoint: LEASES_ENDPOINT,
            detail,
        })?;
        let batch = opnsense::parse_leases(rows);
        tracing::info!(
            leases = batch.observations.len(),
            rejected = batch.rejected.len(),
            "Fetched DHCP leases"
        );
        Ok(batch)
    }

    async fn fetch_arp(&self) -> SourceResult<ObservationBatch> {
        let body = self.get_json(ARP_ENDPOINT).await?;
        let rows = opnsense::arp_rows(body).map_err(|detail| SourceError::Malformed {
            endpoint: ARP_ENDPOINT,
            detail,
        })?;
        let batch = opnsense::parse_arp(rows);
        tracing::info!(
            entries = batch.observations.len(),
            rejected = batch.rejected.len(),
            "Fetched ARP table"
        );
        Ok(batch)
    }
}
