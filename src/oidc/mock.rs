//! Mock OIDC client for testing
//!
//! Mints real HS256 ID tokens through [`MockIssuer`], so ceremonies driven
//! by this client produce bundles the verification engine accepts. Each
//! provider can be scripted to misbehave.

use super::*;
use crate::metadata::MockIssuer;
use crate::nonce::{format_with_hash, FingerprintHash, TrueNonce, HASH_LEN};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

/// How a mock provider answers a ceremony
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MockProviderBehavior {
    /// Echo the requested nonce
    #[default]
    Honest,
    /// Echo a well-formed nonce other than the requested one
    WrongNonce,
    /// Issue a token without a nonce claim
    OmitNonce,
    /// Echo the nonce of the previous ceremony this client served
    ReplayPrevious,
    /// User backs out of the authorization step
    Cancel,
    /// Authorization succeeds, code exchange fails
    FailExchange,
    /// Authorization never completes
    Hang,
}

struct ProviderEntry {
    issuer: MockIssuer,
    email: String,
    behavior: MockProviderBehavior,
}

struct IssuedCode {
    display_id: String,
    nonce: Option<String>,
}

#[derive(Default)]
struct MockState {
    providers: HashMap<String, ProviderEntry>,
    codes: HashMap<String, IssuedCode>,
    requests: Vec<AuthorizationRequest>,
    last_nonce: Option<String>,
    exchanges: usize,
}

/// Scriptable in-memory OIDC client
#[derive(Clone, Default)]
pub struct MockOidcClient {
    state: Arc<Mutex<MockState>>,
}

impl MockOidcClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve ceremonies for `display_id`, signing as `issuer` for `email`
    pub fn register(&self, display_id: &str, issuer: MockIssuer, email: &str) {
        let mut state = self.state.lock().unwrap();
        state.providers.insert(
            display_id.to_string(),
            ProviderEntry {
                issuer,
                email: email.to_string(),
                behavior: MockProviderBehavior::Honest,
            },
        );
    }

    pub fn set_behavior(&self, display_id: &str, behavior: MockProviderBehavior) {
        let mut state = self.state.lock().unwrap();
        if let Some(entry) = state.providers.get_mut(display_id) {
            entry.behavior = behavior;
        }
    }

    /// Authorization requests received so far, in order
    pub fn requests(&self) -> Vec<AuthorizationRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    /// Number of code exchanges attempted
    pub fn exchanges(&self) -> usize {
        self.state.lock().unwrap().exchanges
    }

    fn authorize(&self, request: &AuthorizationRequest) -> Result<AuthorizationResult, OidcError> {
        let mut state = self.state.lock().unwrap();
        state.requests.push(request.clone());
        let previous = state.last_nonce.replace(request.nonce.clone());

        let display_id = &request.provider.display_id;
        let behavior = state
            .providers
            .get(display_id)
            .map(|entry| entry.behavior)
            .ok_or_else(|| OidcError::Authorization(format!("unknown provider {}", display_id)))?;

        let nonce = match behavior {
            MockProviderBehavior::Cancel => return Err(OidcError::Cancelled),
            MockProviderBehavior::Honest | MockProviderBehavior::FailExchange => {
                Some(request.nonce.clone())
            }
            MockProviderBehavior::WrongNonce => Some(
                format_with_hash(&TrueNonce::generate(), &FingerprintHash::from_bytes([0u8; HASH_LEN]))
                    .into_string(),
            ),
            MockProviderBehavior::OmitNonce => None,
            MockProviderBehavior::ReplayPrevious => previous,
            MockProviderBehavior::Hang => {
                return Err(OidcError::Authorization("provider hangs".to_string()))
            }
        };

        let code = Uuid::new_v4().to_string();
        state.codes.insert(
            code.clone(),
            IssuedCode {
                display_id: display_id.clone(),
                nonce,
            },
        );

        Ok(AuthorizationResult {
            provider: request.provider.clone(),
            code,
            state: request.state.clone(),
        })
    }

    fn is_hanging(&self, display_id: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .providers
            .get(display_id)
            .is_some_and(|entry| entry.behavior == MockProviderBehavior::Hang)
    }
}

#[async_trait]
impl OidcClient for MockOidcClient {
    async fn begin_authorization(
        &self,
        request: &AuthorizationRequest,
    ) -> Result<AuthorizationResult, OidcError> {
        if self.is_hanging(&request.provider.display_id) {
            self.state.lock().unwrap().requests.push(request.clone());
            return std::future::pending().await;
        }
        self.authorize(request)
    }

    async fn exchange_code(&self, result: AuthorizationResult) -> Result<String, OidcError> {
        let mut state = self.state.lock().unwrap();
        state.exchanges += 1;

        let issued = state
            .codes
            .remove(&result.code)
            .ok_or_else(|| OidcError::Exchange("unknown or reused code".to_string()))?;
        let entry = state
            .providers
            .get(&issued.display_id)
            .ok_or_else(|| OidcError::Exchange("provider vanished".to_string()))?;

        if entry.behavior == MockProviderBehavior::FailExchange {
            return Err(OidcError::Exchange("token endpoint returned 500".to_string()));
        }

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        let mut claims = json!({
            "iss": entry.issuer.issuer,
            "aud": result.provider.client_id,
            "sub": format!("sub-{}", entry.email),
            "email": entry.email,
            "iat": now,
            "exp": now + 3600,
        });
        if let Some(nonce) = issued.nonce {
            claims["nonce"] = json!(nonce);
        }

        Ok(entry.issuer.sign(&claims))
    }
}
