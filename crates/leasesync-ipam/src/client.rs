//! phpIPAM connection management, token handling, and response classification.

use std::fmt;
use std::time::Duration;

use leasesync_core::{ErrorKind, RetryPolicy, Retryable};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;

/// Errors from inventory operations.
#[derive(Debug, thiserror::Error)]
pub enum IpamError {
    #[error("phpIPAM authentication failed: {0}")]
    Auth(String),

    #[error("Address already exists: {0}")]
    Conflict(String),

    #[error("Address not found: {0}")]
    NotFound(String),

    #[error("Transient phpIPAM failure: {0}")]
    Transient(String),

    #[error("phpIPAM rejected request ({status}): {detail}")]
    Rejected { status: u16, detail: String },

    #[error("Failed to decode phpIPAM response: {0}")]
    Decode(String),

    #[error("Invalid inventory client configuration: {0}")]
    InvalidConfig(String),

    #[error("Gave up after {attempts} attempt(s): {message}")]
    RetriesExhausted { attempts: u32, message: String },
}

impl IpamError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Auth(_) => ErrorKind::Auth,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Transient(_) | Self::RetriesExhausted { .. } => ErrorKind::Transient,
            Self::Rejected { .. } | Self::Decode(_) => ErrorKind::Rejected,
            Self::InvalidConfig(_) => ErrorKind::Config,
        }
    }
}

impl Retryable for IpamError {
    fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    fn exhausted(self, attempts: u32) -> Self {
        Self::RetriesExhausted {
            attempts,
            message: self.to_string(),
        }
    }
}

impl From<reqwest::Error> for IpamError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Decode(e.to_string())
        } else if e.is_builder() {
            Self::InvalidConfig(e.to_string())
        } else {
            // Timeouts, refused connections, and broken bodies.
            Self::Transient(e.to_string())
        }
    }
}

pub type IpamResult<T> = Result<T, IpamError>;

/// URL scheme used to reach phpIPAM.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Http,
    #[default]
    Https,
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http => f.write_str("http"),
            Self::Https => f.write_str("https"),
        }
    }
}

/// Configuration for connecting to phpIPAM.
#[derive(Debug, Clone)]
pub struct IpamConfig {
    pub host: String,
    pub scheme: Scheme,
    pub app_id: String,
    pub app_code: String,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

/// Bearer token issued by phpIPAM. Lives only in memory for one run.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken(String);

impl AuthToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthToken(***)")
    }
}

/// Standard phpIPAM response envelope.
#[derive(Debug, Deserialize)]
pub(crate) struct Envelope<T> {
    pub data: Option<T>,
    pub id: Option<leasesync_core::AddressId>,
}

#[derive(Debug, Deserialize)]
struct TokenData {
    token: Option<String>,
}

/// phpIPAM REST client scoped to one application id.
///
/// Holds the token acquired by [`IpamClient::authenticate`]; each run builds
/// its own client, so tokens are never shared between runs.
#[derive(Clone)]
pub struct IpamClient {
    base_url: String,
    app_id: String,
    app_code: String,
    http: Client,
    pub(crate) retry: RetryPolicy,
    token: Option<AuthToken>,
}

impl fmt::Debug for IpamClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IpamClient")
            .field("base_url", &self.base_url)
            .field("app_id", &self.app_id)
            .field("authenticated", &self.token.is_some())
            .finish()
    }
}

impl IpamClient {
    pub fn new(config: &IpamConfig) -> IpamResult<Self> {
        if config.host.trim().is_empty() || config.app_id.trim().is_empty() {
            return Err(IpamError::InvalidConfig(
                "inventory host and app id are required".to_string(),
            ));
        }

        let http = Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("leasesync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| IpamError::InvalidConfig(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self::with_http_client(
            format!("{}://{}", config.scheme, config.host.trim_end_matches('/')),
            &config.app_id,
            &config.app_code,
            http,
            config.retry.clone(),
        ))
    }

    /// Create a client with a pre-built `reqwest::Client` (for testing).
    pub fn with_http_client(
        base_url: impl Into<String>,
        app_id: &str,
        app_code: &str,
        http: Client,
        retry: RetryPolicy,
    ) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            app_id: app_id.to_string(),
            app_code: app_code.to_string(),
            http,
            retry,
            token: None,
        }
    }

    /// Exchange the app id/code pair for a bearer token and keep it for
    /// subsequent calls.
    pub async fn authenticate(&mut self) -> IpamResult<AuthToken> {
        let token = self
            .retry
            .execute("authenticate", || self.request_token())
            .await?;
        tracing::info!(app_id = %self.app_id, "Authenticated to phpIPAM");
        self.token = Some(token.clone());
        Ok(token)
    }

    async fn request_token(&self) -> IpamResult<AuthToken> {
        let response = self
            .http
            .post(self.api_url("user/"))
            .basic_auth(&self.app_id, Some(&self.app_code))
            .send()
            .await?;

        let response = match check_status(response).await {
            Ok(r) => r,
            Err(e @ (IpamError::Transient(_) | IpamError::Auth(_))) => return Err(e),
            Err(e) => return Err(IpamError::Auth(e.to_string())),
        };

        let body: Envelope<TokenData> = response
            .json()
            .await
            .map_err(|e| IpamError::Auth(format!("unreadable token response: {e}")))?;

        body.data
            .and_then(|d| d.token)
            .filter(|t| !t.is_empty())
            .map(AuthToken::new)
            .ok_or_else(|| IpamError::Auth("no token in response".to_string()))
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    pub(crate) fn api_url(&self, path: &str) -> String {
        format!("{}/api/{}/{}", self.base_url, self.app_id, path)
    }

    /// Attach the session token to a request.
    pub(crate) fn authorized(&self, request: RequestBuilder) -> IpamResult<RequestBuilder> {
        let token = self
            .token
            .as_ref()
            .ok_or_else(|| IpamError::Auth("not authenticated".to_string()))?;
        Ok(request.header("phpipam-token", token.expose()))
    }

    pub(crate) fn http(&self) -> &Client {
        &self.http
    }
}

/// Map a non-success response onto the error taxonomy.
pub(crate) async fn check_status(response: Response) -> IpamResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<no body>".to_string());
    let detail = error_message(&body).unwrap_or_else(|| {
        if body.is_empty() {
            format!("HTTP {status}")
        } else {
            body.clone()
        }
    });

    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => IpamError::Auth(detail),
        StatusCode::NOT_FOUND => IpamError::NotFound(detail),
        StatusCode::CONFLICT => IpamError::Conflict(detail),
        // Some phpIPAM releases report duplicates as a plain 400.
        StatusCode::BAD_REQUEST if detail.to_lowercase().contains("already exists") => {
            IpamError::Conflict(detail)
        }
        StatusCode::TOO_MANY_REQUESTS => IpamError::Transient(detail),
        s if s.is_server_error() => IpamError::Transient(format!("HTTP {s}: {detail}")),
        s => IpamError::Rejected {
            status: s.as_u16(),
            detail,
        },
    })
}

/// phpIPAM puts a human-readable reason in `message`.
fn error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value
        .get("message")
        .and_then(|m| m.as_str())
        .map(String::from)
}
