//! OpenID Connect client boundary
//!
//! The authorization-code round trip (redirect, consent, code-for-token) is
//! host mediated and lives outside this crate. The ceremony only needs to
//! hand over a nonce and get a raw ID token back.

use crate::provider::Provider;
use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

pub mod mock;

pub use mock::{MockOidcClient, MockProviderBehavior};

/// Scope requested in every ceremony; `email` carries the identity claim
pub const DEFAULT_SCOPE: &str = "openid email";

/// Authorization-code request handed to the host's OIDC client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationRequest {
    pub provider: Provider,
    /// Compound nonce the provider must echo in the ID token
    pub nonce: String,
    pub scope: String,
    /// Opaque CSRF value, checked by the OIDC client on redirect
    pub state: String,
}

impl AuthorizationRequest {
    pub fn new(provider: Provider, nonce: &str) -> Self {
        Self {
            provider,
            nonce: nonce.to_string(),
            scope: DEFAULT_SCOPE.to_string(),
            state: Uuid::new_v4().simple().to_string(),
        }
    }

    pub fn redirect_uri(&self) -> &str {
        &self.provider.redirect_uri
    }
}

/// Completed authorization step, ready for the code exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationResult {
    pub provider: Provider,
    pub code: String,
    pub state: String,
}

/// OIDC client failures; each skips one provider, never the session
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OidcError {
    #[error("Authorization cancelled by the user")]
    Cancelled,

    #[error("Authorization failed: {0}")]
    Authorization(String),

    #[error("Code exchange failed: {0}")]
    Exchange(String),

    #[error("Token response carried no ID token")]
    NoIdToken,
}

/// Host-provided OpenID Connect client
#[async_trait]
pub trait OidcClient: Send + Sync {
    /// Run the interactive authorization step; completes when the host redirect returns
    async fn begin_authorization(
        &self,
        request: &AuthorizationRequest,
    ) -> Result<AuthorizationResult, OidcError>;

    /// Exchange the authorization code for a raw compact ID token
    async fn exchange_code(&self, result: AuthorizationResult) -> Result<String, OidcError>;
}
