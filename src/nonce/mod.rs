//! Nonce binding: salted fingerprint stretching and compound nonces
//!
//! ```text
//! H1    = SHA-512(salt || F || F)
//! Hi    = SHA-512(H(i-1) || F)        for i = 2..=1024
//! hash  = H1024[..32]
//!
//! compound-nonce = base64(true-nonce) "&" base64(hash)
//! ```
//!
//! The round count and digest are fixed. The stretch exists to defeat
//! cross-salt precomputation; the fingerprint is not secret from an active
//! adversary on the channel, so this is not a password KDF.
//!
//! Every [`stretch`] call builds fresh `Sha512` state; nothing incremental is
//! shared between calls.

use crate::fingerprint::Fingerprint;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::RngCore;
use sha2::{Digest, Sha512};
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use zeroize::{Zeroize, ZeroizeOnDrop};

#[cfg(test)]
mod proptests;

/// Number of SHA-512 rounds in [`stretch`]
pub const STRETCH_ROUNDS: usize = 1024;

/// Length of a freshly generated salt
pub const SALT_LEN: usize = 32;

/// Length of the random part of a compound nonce
pub const TRUE_NONCE_LEN: usize = 32;

/// Length of a stretched fingerprint hash
pub const HASH_LEN: usize = 32;

/// Separator between the two halves of a compound nonce
pub const NONCE_SEPARATOR: char = '&';

/// Cached hashes kept per binder before the cache is reset
const MAX_CACHED_HASHES: usize = 64;

/// Nonce parsing and binding errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NonceError {
    /// Structurally invalid nonce; not retryable
    #[error("Invalid compound nonce: {0}")]
    Invalid(String),

    #[error("Invalid salt encoding: {0}")]
    InvalidSalt(String),

    #[error("Token carries no nonce claim")]
    Missing,

    #[error("Nonce is not bound to the local fingerprint")]
    Mismatch,
}

/// Per-bundle binding salt (non-secret)
///
/// Generated salts are [`SALT_LEN`] bytes; a received salt is used as-is,
/// whatever its length.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Salt(Vec<u8>);

impl Salt {
    /// Draw a fresh random salt
    pub fn generate() -> Self {
        let mut bytes = vec![0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn from_base64(encoded: &str) -> Result<Self, NonceError> {
        STANDARD
            .decode(encoded)
            .map(Self)
            .map_err(|e| NonceError::InvalidSalt(e.to_string()))
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Salt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Salt({})", self.to_base64())
    }
}

/// Fresh per-ceremony randomness, cleared from memory on drop
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct TrueNonce([u8; TRUE_NONCE_LEN]);

impl TrueNonce {
    pub fn generate() -> Self {
        let mut bytes = [0u8; TRUE_NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; TRUE_NONCE_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; TRUE_NONCE_LEN] {
        &self.0
    }
}

impl fmt::Debug for TrueNonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TrueNonce(..)")
    }
}

/// Stretched fingerprint hash embedded in a compound nonce
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FingerprintHash([u8; HASH_LEN]);

impl FingerprintHash {
    pub fn from_bytes(bytes: [u8; HASH_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Constant-time equality
    pub fn ct_eq(&self, other: &FingerprintHash) -> bool {
        ring::constant_time::verify_slices_are_equal(&self.0, &other.0).is_ok()
    }
}

impl fmt::Debug for FingerprintHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FingerprintHash({})", self.to_hex())
    }
}

/// OIDC `nonce` value: `base64(true nonce) & base64(fingerprint hash)`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CompoundNonce(String);

impl CompoundNonce {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for CompoundNonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Bind a salt to a fingerprint with the fixed 1024-round SHA-512 iteration
pub fn stretch(fingerprint: &[u8], salt: &[u8]) -> FingerprintHash {
    let mut hash = Sha512::new()
        .chain_update(salt)
        .chain_update(fingerprint)
        .chain_update(fingerprint)
        .finalize();

    for _ in 1..STRETCH_ROUNDS {
        hash = Sha512::new()
            .chain_update(hash)
            .chain_update(fingerprint)
            .finalize();
    }

    let mut out = [0u8; HASH_LEN];
    out.copy_from_slice(&hash[..HASH_LEN]);
    FingerprintHash(out)
}

/// Format a compound nonce from a true nonce and a precomputed hash
pub fn format_with_hash(true_nonce: &TrueNonce, hash: &FingerprintHash) -> CompoundNonce {
    CompoundNonce(format!(
        "{}{}{}",
        STANDARD.encode(true_nonce.as_bytes()),
        NONCE_SEPARATOR,
        STANDARD.encode(hash.as_bytes())
    ))
}

/// Format a compound nonce, stretching the fingerprint on the spot
pub fn format_nonce(true_nonce: &TrueNonce, fingerprint: &Fingerprint, salt: &Salt) -> CompoundNonce {
    format_with_hash(true_nonce, &stretch(fingerprint.as_bytes(), salt.as_bytes()))
}

/// Split a compound nonce into its true nonce and fingerprint hash
///
/// Fails with [`NonceError::Invalid`] unless there is exactly one separator
/// and both halves decode to 32 bytes.
pub fn parse_nonce(nonce: &str) -> Result<(TrueNonce, FingerprintHash), NonceError> {
    let mut parts = nonce.split(NONCE_SEPARATOR);
    let (true_part, hash_part) = match (parts.next(), parts.next(), parts.next()) {
        (Some(t), Some(h), None) => (t, h),
        _ => {
            return Err(NonceError::Invalid(format!(
                "expected exactly one '{}' separator",
                NONCE_SEPARATOR
            )))
        }
    };

    let true_nonce = decode_fixed::<TRUE_NONCE_LEN>(true_part, "true nonce")?;
    let hash = decode_fixed::<HASH_LEN>(hash_part, "fingerprint hash")?;

    Ok((TrueNonce(true_nonce), FingerprintHash(hash)))
}

fn decode_fixed<const N: usize>(segment: &str, what: &str) -> Result<[u8; N], NonceError> {
    let mut decoded = STANDARD
        .decode(segment)
        .map_err(|e| NonceError::Invalid(format!("{} is not base64: {}", what, e)))?;

    let result = <[u8; N]>::try_from(decoded.as_slice()).map_err(|_| {
        NonceError::Invalid(format!(
            "{} must be {} bytes, got {}",
            what,
            N,
            decoded.len()
        ))
    });
    decoded.zeroize();
    result
}

/// Stateless-by-contract nonce binder with a per-(fingerprint, salt) hash cache
///
/// Shared between concurrent ceremonies and verification passes. The cache
/// only saves repeated stretches; every computation uses its own digest state.
#[derive(Debug, Default)]
pub struct NonceBinder {
    cache: Mutex<HashMap<(Vec<u8>, Vec<u8>), FingerprintHash>>,
}

impl NonceBinder {
    pub fn new() -> Self {
        Self::default()
    }

    /// `stretch(fingerprint, salt)`, cached
    pub fn hash_for(&self, fingerprint: &Fingerprint, salt: &Salt) -> FingerprintHash {
        let key = (fingerprint.as_bytes().to_vec(), salt.as_bytes().to_vec());

        if let Some(hash) = self.lock_cache().get(&key) {
            return *hash;
        }

        // Computed outside the lock; a racing caller may compute the same value.
        let hash = stretch(&key.0, &key.1);

        let mut cache = self.lock_cache();
        if cache.len() >= MAX_CACHED_HASHES {
            cache.clear();
        }
        cache.insert(key, hash);
        hash
    }

    pub fn format_nonce(
        &self,
        true_nonce: &TrueNonce,
        fingerprint: &Fingerprint,
        salt: &Salt,
    ) -> CompoundNonce {
        format_with_hash(true_nonce, &self.hash_for(fingerprint, salt))
    }

    /// New compound nonce with fresh randomness
    pub fn fresh_nonce(&self, fingerprint: &Fingerprint, salt: &Salt) -> CompoundNonce {
        self.format_nonce(&TrueNonce::generate(), fingerprint, salt)
    }

    /// Check that a token's nonce claim is bound to the locally derived fingerprint
    ///
    /// `fingerprint` must be derived locally, never taken from the peer.
    pub fn check_binding(
        &self,
        nonce_claim: Option<&str>,
        fingerprint: &Fingerprint,
        salt: &Salt,
    ) -> Result<(), NonceError> {
        let claim = nonce_claim.ok_or(NonceError::Missing)?;
        let (_, embedded) = parse_nonce(claim)?;

        if embedded.ct_eq(&self.hash_for(fingerprint, salt)) {
            Ok(())
        } else {
            Err(NonceError::Mismatch)
        }
    }

    fn lock_cache(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<(Vec<u8>, Vec<u8>), FingerprintHash>> {
        // The cache holds plain values; a poisoned lock still has usable contents.
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// The single outstanding nonce of an in-flight ceremony
///
/// Consumed by [`PendingNonce::matches`]: once compared it is gone, so the
/// same nonce can never be accepted for a second token.
#[derive(Debug)]
pub struct PendingNonce(CompoundNonce);

impl PendingNonce {
    pub fn new(nonce: CompoundNonce) -> Self {
        Self(nonce)
    }

    /// Value to send as the authorization request `nonce`
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Exact comparison against the nonce echoed in the returned ID token
    pub fn matches(self, echoed: &str) -> bool {
        ring::constant_time::verify_slices_are_equal(self.0.as_str().as_bytes(), echoed.as_bytes())
            .is_ok()
    }
}
