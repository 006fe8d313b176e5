//! Provider metadata resolution
//!
//! Resolves a provider's discovery document (issuer, JWKS location) and its
//! signing keys. Each token in a verification pass resolves independently;
//! a failure drops that token only. Nothing here retries.

use async_trait::async_trait;
use jsonwebtoken::jwk::JwkSet;
use reqwest::header::USER_AGENT;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub mod mock;

pub use mock::{MockIssuer, MockMetadataResolver};

/// Default per-request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// The parts of an OIDC discovery document the verifier needs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderMetadata {
    pub issuer: String,
    pub jwks_uri: String,
}

/// Metadata fetch errors (per token, drop-and-continue)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MetadataError {
    #[error("Request to {url} failed: {error}")]
    Network { url: String, error: String },

    #[error("Request to {url} returned status {status}")]
    Status { url: String, status: u16 },

    #[error("Response from {url} could not be parsed: {error}")]
    Parse { url: String, error: String },

    #[error("Refusing non-https metadata URL {0}")]
    InsecureUrl(String),
}

/// Fetches provider metadata and signing keys
#[async_trait]
pub trait ProviderMetadataResolver: Send + Sync {
    /// Fetch and parse the discovery document at `discovery_url`
    async fn fetch(&self, discovery_url: &str) -> Result<ProviderMetadata, MetadataError>;

    /// Fetch the JSON Web Key Set at `jwks_uri`
    async fn fetch_keys(&self, jwks_uri: &str) -> Result<JwkSet, MetadataError>;
}

/// HTTP resolver over a shared `reqwest` client
///
/// Sets a per-request timeout and a `User-Agent`, and refuses plain-http URLs
/// unless `require_https` is off (local test servers).
#[derive(Debug, Clone)]
pub struct HttpMetadataResolver {
    client: reqwest::Client,
    timeout: Duration,
    require_https: bool,
}

impl HttpMetadataResolver {
    pub fn new(timeout: Duration, require_https: bool) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
            require_https,
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, MetadataError> {
        if self.require_https && !url.starts_with("https://") {
            return Err(MetadataError::InsecureUrl(url.to_string()));
        }

        let response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .header(USER_AGENT, format!("idbind/{}", env!("CARGO_PKG_VERSION")))
            .send()
            .await
            .map_err(|e| MetadataError::Network {
                url: url.to_string(),
                error: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(MetadataError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response.json::<T>().await.map_err(|e| MetadataError::Parse {
            url: url.to_string(),
            error: e.to_string(),
        })
    }
}

impl Default for HttpMetadataResolver {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT, true)
    }
}

#[async_trait]
impl ProviderMetadataResolver for HttpMetadataResolver {
    async fn fetch(&self, discovery_url: &str) -> Result<ProviderMetadata, MetadataError> {
        tracing::debug!(url = discovery_url, "fetching discovery document");
        self.get_json(discovery_url).await
    }

    async fn fetch_keys(&self, jwks_uri: &str) -> Result<JwkSet, MetadataError> {
        tracing::debug!(url = jwks_uri, "fetching signing keys");
        self.get_json(jwks_uri).await
    }
}
