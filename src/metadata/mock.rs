//! Mock metadata resolver for testing
//!
//! Serves discovery documents and key sets from memory and records every
//! request, so tests can assert on per-token resolution.

use super::*;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// In-memory metadata resolver
#[derive(Clone, Default)]
pub struct MockMetadataResolver {
    state: Arc<Mutex<MockState>>,
}

#[derive(Default)]
struct MockState {
    documents: HashMap<String, ProviderMetadata>,
    key_sets: HashMap<String, JwkSet>,
    failing: HashMap<String, MetadataError>,
    requests: Vec<String>,
}

impl MockMetadataResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `metadata` at `discovery_url`
    pub fn add_document(&self, discovery_url: &str, metadata: ProviderMetadata) {
        let mut state = self.state.lock().unwrap();
        state.documents.insert(discovery_url.to_string(), metadata);
    }

    /// Serve `keys` at `jwks_uri`
    pub fn add_keys(&self, jwks_uri: &str, keys: JwkSet) {
        let mut state = self.state.lock().unwrap();
        state.key_sets.insert(jwks_uri.to_string(), keys);
    }

    /// Make every request to `url` fail with `error`
    pub fn fail(&self, url: &str, error: MetadataError) {
        let mut state = self.state.lock().unwrap();
        state.failing.insert(url.to_string(), error);
    }

    /// URLs requested so far, in order
    pub fn requests(&self) -> Vec<String> {
        self.state.lock().unwrap().requests.clone()
    }

    fn lookup<T: Clone>(
        &self,
        url: &str,
        pick: impl Fn(&MockState) -> Option<T>,
    ) -> Result<T, MetadataError> {
        let mut state = self.state.lock().unwrap();
        state.requests.push(url.to_string());

        if let Some(error) = state.failing.get(url) {
            return Err(error.clone());
        }

        pick(&state).ok_or_else(|| MetadataError::Status {
            url: url.to_string(),
            status: 404,
        })
    }
}

#[async_trait]
impl ProviderMetadataResolver for MockMetadataResolver {
    async fn fetch(&self, discovery_url: &str) -> Result<ProviderMetadata, MetadataError> {
        self.lookup(discovery_url, |state| {
            state.documents.get(discovery_url).cloned()
        })
    }

    async fn fetch_keys(&self, jwks_uri: &str) -> Result<JwkSet, MetadataError> {
        self.lookup(jwks_uri, |state| state.key_sets.get(jwks_uri).cloned())
    }
}

/// Test identity provider signing HS256 tokens with a symmetric (`oct`) JWK
///
/// Pairs with [`MockMetadataResolver::add_issuer`] so tests can mint ID
/// tokens that pass real `jsonwebtoken` verification.
#[derive(Debug, Clone)]
pub struct MockIssuer {
    pub issuer: String,
    pub kid: String,
    secret: Vec<u8>,
}

impl MockIssuer {
    /// Use a `secret` whose base64 form has no padding and no `+`/`/`
    /// (e.g. 33 ASCII bytes), so the published `k` decodes under either alphabet.
    pub fn new(issuer: &str, kid: &str, secret: &[u8]) -> Self {
        Self {
            issuer: issuer.to_string(),
            kid: kid.to_string(),
            secret: secret.to_vec(),
        }
    }

    pub fn discovery_url(&self) -> String {
        format!("{}{}", self.issuer, crate::provider::DISCOVERY_SUFFIX)
    }

    pub fn jwks_uri(&self) -> String {
        format!("{}/keys", self.issuer)
    }

    pub fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            issuer: self.issuer.clone(),
            jwks_uri: self.jwks_uri(),
        }
    }

    pub fn jwks(&self) -> JwkSet {
        use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};

        serde_json::from_value(serde_json::json!({
            "keys": [{
                "kty": "oct",
                "kid": self.kid,
                "alg": "HS256",
                "k": URL_SAFE_NO_PAD.encode(&self.secret),
            }]
        }))
        .expect("static JWK set is well-formed")
    }

    /// Sign `claims` as a compact HS256 JWS carrying this issuer's `kid`
    pub fn sign(&self, claims: &serde_json::Value) -> String {
        use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};

        let mut header = Header::new(Algorithm::HS256);
        header.kid = Some(self.kid.clone());
        encode(&header, claims, &EncodingKey::from_secret(&self.secret))
            .expect("HS256 signing cannot fail")
    }

    /// Provider record for this issuer
    pub fn provider(&self, display_id: &str, client_id: &str) -> crate::provider::Provider {
        crate::provider::Provider {
            display_id: display_id.to_string(),
            discovery_url: self.discovery_url(),
            client_id: client_id.to_string(),
            redirect_uri: "idbind-test://callback".to_string(),
        }
    }
}

impl MockMetadataResolver {
    /// Serve discovery document and keys for `issuer`
    pub fn add_issuer(&self, issuer: &MockIssuer) {
        self.add_document(&issuer.discovery_url(), issuer.metadata());
        self.add_keys(&issuer.jwks_uri(), issuer.jwks());
    }
}
