//! Unverified ID token preview, for routing only
//!
//! Reads the token payload without checking its signature or any standard
//! claim. The result decides which provider's metadata to fetch; it is never
//! a trust decision. Verification happens in [`crate::verify`].

use crate::provider::{Provider, ProviderRegistry};
use jsonwebtoken::{decode, decode_header, DecodingKey, Validation};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;

/// Claim carrying the user's identity in the tokens we request (`scope=openid email`)
pub const IDENTITY_CLAIM: &str = "email";

/// Per-token routing errors; the token is dropped and the batch continues
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClaimError {
    #[error("Malformed token: {0}")]
    Malformed(String),

    #[error("Token carries no identity (email) claim")]
    NoIdentity,

    #[error("No registered provider for issuer {0:?}")]
    UnknownIssuer(String),
}

/// What a token claims to be, before verification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimPreview {
    pub claimed_identity: String,
    pub issuer: String,
    pub provider: Provider,
}

#[derive(Debug, Deserialize)]
struct RoutingClaims {
    iss: Option<String>,
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NonceClaim {
    nonce: Option<String>,
}

/// Decode a compact JWT's claims without any validation
pub fn unverified_claims<T: DeserializeOwned>(token: &str) -> Result<T, ClaimError> {
    let header = decode_header(token).map_err(|e| ClaimError::Malformed(e.to_string()))?;

    let mut validation = Validation::new(header.alg);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    decode::<T>(token, &DecodingKey::from_secret(&[]), &validation)
        .map(|data| data.claims)
        .map_err(|e| ClaimError::Malformed(e.to_string()))
}

/// The `nonce` claim of a token, unverified
pub fn unverified_nonce(token: &str) -> Result<Option<String>, ClaimError> {
    unverified_claims::<NonceClaim>(token).map(|claims| claims.nonce)
}

/// Routes tokens to registered providers by their (unverified) issuer
#[derive(Debug, Clone)]
pub struct TokenClaimReader {
    registry: Arc<ProviderRegistry>,
}

impl TokenClaimReader {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self { registry }
    }

    pub fn preview(&self, token: &str) -> Result<ClaimPreview, ClaimError> {
        let claims: RoutingClaims = unverified_claims(token)?;

        let claimed_identity = claims
            .email
            .filter(|email| !email.trim().is_empty())
            .ok_or(ClaimError::NoIdentity)?;

        let issuer = claims.iss.unwrap_or_default();
        let provider = self
            .registry
            .by_issuer(&issuer)
            .cloned()
            .ok_or_else(|| ClaimError::UnknownIssuer(issuer.clone()))?;

        Ok(ClaimPreview {
            claimed_identity,
            issuer,
            provider,
        })
    }
}
