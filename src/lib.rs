//! idbind - Safety-number binding for OpenID Connect ID tokens
//!
//! Two parties who have compared safety numbers can attach federated
//! identity proofs to a conversation. The producer of a bundle folds a
//! salted stretch of the fingerprint into the OIDC `nonce` of every
//! ceremony; the receiver recomputes it from its own fingerprint and checks
//! each token's signature, issuer, audience and nonce.
//!
//! Key principles:
//! - The fingerprint is always derived locally, never taken from the wire
//! - A compound nonce is consumed by the one ceremony that issued it
//! - Per-token failures only ever reduce the set of verified identities
//!
//! Bundle flow: [`session::SessionController`] produces, and
//! [`verify::VerificationEngine`] checks.

pub mod bundle;
pub mod claims;
pub mod fingerprint;
pub mod identity;
pub mod metadata;
pub mod nonce;
pub mod oidc;
pub mod provider;
pub mod session;
pub mod transport;
pub mod verify;
