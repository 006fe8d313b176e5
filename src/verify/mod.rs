//! Inbound bundle verification
//!
//! A pass moves through
//! `ParsingBundle -> BoundToFingerprint -> ResolvingProviders -> VerifyingTokens -> Done`.
//!
//! - A malformed or empty bundle ends the pass with no outcomes.
//! - Tokens whose preview or metadata resolution fails are dropped; the rest
//!   of the batch continues.
//! - Tokens that reach verification are always reported, with `verified`
//!   false when any check fails.
//! - Only the local fingerprint is fatal: every check depends on it.
//!
//! Nothing here retries.

use crate::bundle::TokenBundle;
use crate::claims::{ClaimPreview, TokenClaimReader};
use crate::fingerprint::{Fingerprint, FingerprintError, FingerprintSource};
use crate::identity::{IdentityError, IdentitySource, PeerRef, Role};
use crate::metadata::{ProviderMetadata, ProviderMetadataResolver};
use crate::nonce::{NonceBinder, NonceError, Salt};
use crate::provider::{Provider, ProviderRegistry};
use futures::future::join_all;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::jwk::{Jwk, JwkSet};
use jsonwebtoken::{decode, decode_header, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Default clock skew tolerated when expiry is evaluated
pub const DEFAULT_LEEWAY: Duration = Duration::from_secs(60);

/// When (if ever) token expiry is enforced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExpiryPolicy {
    /// Tokens are historical proofs carried in messages; `exp` is not checked
    #[default]
    Ignore,
    /// Evaluate `exp` at this unix time (seconds), e.g. the message timestamp
    At(u64),
}

/// Verifier tuning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifierConfig {
    pub expiry: ExpiryPolicy,
    pub leeway: Duration,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            expiry: ExpiryPolicy::Ignore,
            leeway: DEFAULT_LEEWAY,
        }
    }
}

/// Why a routed token did not verify
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum VerificationFailure {
    #[error("No signing key matches the token")]
    KeyNotFound,

    #[error("Signature check failed: {0}")]
    Signature(String),

    #[error("Issuer does not match provider metadata")]
    Issuer,

    #[error("Audience does not match provider client id")]
    Audience,

    #[error("Token claims are malformed: {0}")]
    MalformedClaims(String),

    #[error("Token expired")]
    Expired,

    #[error("Token carries no nonce")]
    MissingNonce,

    #[error("Token nonce is malformed")]
    MalformedNonce,

    #[error("Nonce is not bound to the local fingerprint")]
    NonceMismatch,
}

impl From<NonceError> for VerificationFailure {
    fn from(error: NonceError) -> Self {
        match error {
            NonceError::Missing => VerificationFailure::MissingNonce,
            NonceError::Mismatch => VerificationFailure::NonceMismatch,
            NonceError::Invalid(_) | NonceError::InvalidSalt(_) => {
                VerificationFailure::MalformedNonce
            }
        }
    }
}

/// Result for one token that reached verification
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationOutcome {
    /// Identity the token claims, reported even when unverified
    pub claimed_identity: String,
    pub provider: Provider,
    pub verified: bool,
    pub failure: Option<VerificationFailure>,
}

/// Outcomes plus the number of tokens dropped before verification
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VerificationReport {
    pub outcomes: Vec<VerificationOutcome>,
    pub unevaluated: usize,
}

impl VerificationReport {
    pub fn verified(&self) -> impl Iterator<Item = &VerificationOutcome> {
        self.outcomes.iter().filter(|o| o.verified)
    }
}

/// Errors that abort a whole pass
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    #[error("Identity lookup failed: {0}")]
    Identity(#[from] IdentityError),

    #[error("Fingerprint unavailable: {0}")]
    FingerprintUnavailable(#[from] FingerprintError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    ParsingBundle,
    BoundToFingerprint,
    ResolvingProviders,
    VerifyingTokens,
    Done,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::ParsingBundle => "parsing_bundle",
            Phase::BoundToFingerprint => "bound_to_fingerprint",
            Phase::ResolvingProviders => "resolving_providers",
            Phase::VerifyingTokens => "verifying_tokens",
            Phase::Done => "done",
        };
        f.write_str(name)
    }
}

/// A token with its provider metadata and keys resolved
struct RoutedToken<'a> {
    index: usize,
    token: &'a str,
    preview: ClaimPreview,
    metadata: ProviderMetadata,
    keys: JwkSet,
}

#[derive(Debug, Deserialize)]
struct BoundClaims {
    exp: Option<u64>,
    nonce: Option<String>,
}

/// Verifies received token bundles against the local fingerprint
pub struct VerificationEngine<I, F, R> {
    identities: I,
    fingerprints: F,
    resolver: R,
    claims: TokenClaimReader,
    binder: Arc<NonceBinder>,
    config: VerifierConfig,
}

impl<I, F, R> VerificationEngine<I, F, R>
where
    I: IdentitySource,
    F: FingerprintSource,
    R: ProviderMetadataResolver,
{
    pub fn new(identities: I, fingerprints: F, resolver: R, registry: Arc<ProviderRegistry>) -> Self {
        Self {
            identities,
            fingerprints,
            resolver,
            claims: TokenClaimReader::new(registry),
            binder: Arc::new(NonceBinder::new()),
            config: VerifierConfig::default(),
        }
    }

    /// Share a binder (and its hash cache) with other components
    pub fn with_binder(mut self, binder: Arc<NonceBinder>) -> Self {
        self.binder = binder;
        self
    }

    pub fn with_config(mut self, config: VerifierConfig) -> Self {
        self.config = config;
        self
    }

    /// Verify a received bundle; dropped tokens are absent from the result
    pub async fn verify_bundle(
        &self,
        bundle: &str,
        peer: &PeerRef,
        role: Role,
    ) -> Result<Vec<VerificationOutcome>, VerifyError> {
        self.verify_bundle_report(bundle, peer, role)
            .await
            .map(|report| report.outcomes)
    }

    /// Like [`verify_bundle`](Self::verify_bundle), also counting dropped tokens
    pub async fn verify_bundle_report(
        &self,
        bundle: &str,
        peer: &PeerRef,
        role: Role,
    ) -> Result<VerificationReport, VerifyError> {
        self.run(bundle, peer, role, self.config.expiry).await
    }

    /// Verify with token expiry evaluated at `unix_seconds`
    pub async fn verify_bundle_at(
        &self,
        bundle: &str,
        peer: &PeerRef,
        role: Role,
        unix_seconds: u64,
    ) -> Result<VerificationReport, VerifyError> {
        self.run(bundle, peer, role, ExpiryPolicy::At(unix_seconds))
            .await
    }

    async fn run(
        &self,
        wire: &str,
        peer: &PeerRef,
        role: Role,
        expiry: ExpiryPolicy,
    ) -> Result<VerificationReport, VerifyError> {
        let span = info_span!("verify_bundle", pass = %Uuid::new_v4(), peer = %peer, ?role);
        self.run_pass(wire, peer, role, expiry).instrument(span).await
    }

    async fn run_pass(
        &self,
        wire: &str,
        peer: &PeerRef,
        role: Role,
        expiry: ExpiryPolicy,
    ) -> Result<VerificationReport, VerifyError> {
        debug!(phase = %Phase::ParsingBundle);
        let bundle = match TokenBundle::parse(wire) {
            Ok(bundle) => bundle,
            Err(e) => {
                warn!(error = %e, "discarding malformed bundle");
                debug!(phase = %Phase::Done);
                return Ok(VerificationReport::default());
            }
        };
        if bundle.is_empty() {
            debug!(phase = %Phase::Done, "bundle carries no tokens");
            return Ok(VerificationReport::default());
        }

        debug!(phase = %Phase::BoundToFingerprint, tokens = bundle.tokens.len());
        let routing = async {
            let previews: Vec<_> = bundle
                .tokens
                .iter()
                .enumerate()
                .filter_map(|(index, token)| match self.claims.preview(token) {
                    Ok(preview) => Some((index, token.as_str(), preview)),
                    Err(e) => {
                        warn!(token = index, error = %e, "dropping token");
                        None
                    }
                })
                .collect();

            debug!(phase = %Phase::ResolvingProviders, routed = previews.len());
            Ok::<_, VerifyError>(
                join_all(
                    previews
                        .into_iter()
                        .map(|(index, token, preview)| self.resolve(index, token, preview)),
                )
                .await,
            )
        };
        // The fingerprint is polled first, so its computation is under way
        // while the previews run.
        let (fingerprint, resolved) =
            tokio::try_join!(self.local_fingerprint(peer, role), routing)?;
        let routed: Vec<_> = resolved.into_iter().flatten().collect();

        debug!(phase = %Phase::VerifyingTokens, resolved = routed.len());
        let outcomes: Vec<_> = routed
            .iter()
            .map(|routed| self.verify_token(routed, &fingerprint, &bundle.salt, expiry))
            .collect();

        let report = VerificationReport {
            unevaluated: bundle.tokens.len() - outcomes.len(),
            outcomes,
        };
        info!(
            verified = report.verified().count(),
            evaluated = report.outcomes.len(),
            unevaluated = report.unevaluated,
            "verification pass complete"
        );
        debug!(phase = %Phase::Done);
        Ok(report)
    }

    async fn local_fingerprint(&self, peer: &PeerRef, role: Role) -> Result<Fingerprint, VerifyError> {
        let (local, remote) = tokio::try_join!(
            self.identities.self_identity(),
            self.identities.peer_identity(peer)
        )?;
        let (producer, recipient) = role.order(&local, &remote);
        Ok(self.fingerprints.fingerprint(producer, recipient).await?)
    }

    async fn resolve<'a>(
        &self,
        index: usize,
        token: &'a str,
        preview: ClaimPreview,
    ) -> Option<RoutedToken<'a>> {
        let provider = &preview.provider.display_id;

        let metadata = match self.resolver.fetch(&preview.provider.discovery_url).await {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!(token = index, %provider, error = %e, "dropping token: metadata unavailable");
                return None;
            }
        };

        let keys = match self.resolver.fetch_keys(&metadata.jwks_uri).await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(token = index, %provider, error = %e, "dropping token: signing keys unavailable");
                return None;
            }
        };

        Some(RoutedToken {
            index,
            token,
            preview,
            metadata,
            keys,
        })
    }

    fn verify_token(
        &self,
        routed: &RoutedToken<'_>,
        fingerprint: &Fingerprint,
        salt: &Salt,
        expiry: ExpiryPolicy,
    ) -> VerificationOutcome {
        let result = self.check_token(routed, fingerprint, salt, expiry);
        let identity = &routed.preview.claimed_identity;
        match &result {
            Ok(()) => debug!(token = routed.index, %identity, "token verified"),
            Err(failure) => {
                warn!(token = routed.index, %identity, %failure, "token failed verification")
            }
        }

        VerificationOutcome {
            claimed_identity: routed.preview.claimed_identity.clone(),
            provider: routed.preview.provider.clone(),
            verified: result.is_ok(),
            failure: result.err(),
        }
    }

    fn check_token(
        &self,
        routed: &RoutedToken<'_>,
        fingerprint: &Fingerprint,
        salt: &Salt,
        expiry: ExpiryPolicy,
    ) -> Result<(), VerificationFailure> {
        let header = decode_header(routed.token)
            .map_err(|e| VerificationFailure::Signature(e.to_string()))?;
        let jwk = select_key(&routed.keys, header.kid.as_deref())
            .ok_or(VerificationFailure::KeyNotFound)?;
        let key =
            DecodingKey::from_jwk(jwk).map_err(|e| VerificationFailure::Signature(e.to_string()))?;

        let mut validation = Validation::new(header.alg);
        validation.set_issuer(&[&routed.metadata.issuer]);
        validation.set_audience(&[&routed.preview.provider.client_id]);
        validation.set_required_spec_claims(&["iss", "aud"]);
        // Expiry is policy driven, see check_expiry.
        validation.validate_exp = false;

        let claims = decode::<BoundClaims>(routed.token, &key, &validation)
            .map_err(|e| claim_failure(e.kind()))?
            .claims;

        check_expiry(claims.exp, expiry, self.config.leeway)?;

        self.binder
            .check_binding(claims.nonce.as_deref(), fingerprint, salt)
            .map_err(VerificationFailure::from)
    }
}

/// Key named by `kid`, or the only key when the token names none
fn select_key<'a>(keys: &'a JwkSet, kid: Option<&str>) -> Option<&'a Jwk> {
    match kid {
        Some(kid) => keys.find(kid),
        None if keys.keys.len() == 1 => keys.keys.first(),
        None => None,
    }
}

fn claim_failure(kind: &ErrorKind) -> VerificationFailure {
    match kind {
        ErrorKind::InvalidIssuer => VerificationFailure::Issuer,
        ErrorKind::InvalidAudience => VerificationFailure::Audience,
        ErrorKind::MissingRequiredClaim(claim) if claim == "iss" => VerificationFailure::Issuer,
        ErrorKind::MissingRequiredClaim(claim) if claim == "aud" => VerificationFailure::Audience,
        // Signature already checked; `exp` or `nonce` has the wrong JSON type.
        ErrorKind::Json(e) => VerificationFailure::MalformedClaims(e.to_string()),
        other => VerificationFailure::Signature(format!("{:?}", other)),
    }
}

fn check_expiry(
    exp: Option<u64>,
    policy: ExpiryPolicy,
    leeway: Duration,
) -> Result<(), VerificationFailure> {
    match policy {
        ExpiryPolicy::Ignore => Ok(()),
        ExpiryPolicy::At(now) => match exp {
            Some(exp) if exp.saturating_add(leeway.as_secs()) >= now => Ok(()),
            _ => Err(VerificationFailure::Expired),
        },
    }
}
