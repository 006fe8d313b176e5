//! Safety-number fingerprints
//!
//! The fingerprint is the out-of-band trust anchor of the binding protocol:
//! both parties derive it from the ordered pair (producer, recipient) of
//! identities, and it is equal on both sides iff each holds the other's
//! correct public key.
//!
//! The fingerprint algorithm itself is a collaborator ([`FingerprintSource`]).
//! [`NumericFingerprintSource`] is a reference implementation in the style of
//! Signal's numeric fingerprint generator, used by the CLI and the tests.

use crate::identity::PartyIdentity;
use async_trait::async_trait;
use sha2::{Digest, Sha512};
use std::fmt;
use tokio::sync::OnceCell;

/// Version byte prefixed to fingerprints produced by [`NumericFingerprintSource`]
pub const FINGERPRINT_VERSION: u16 = 2;

/// Default hash iterations per party (Signal's numeric fingerprint uses 5200)
pub const DEFAULT_ITERATIONS: u32 = 5200;

/// Length of each party's digest inside a fingerprint
const PARTY_DIGEST_LEN: usize = 32;

/// Opaque deterministic fingerprint bytes
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(Vec<u8>);

impl Fingerprint {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.to_hex())
    }
}

/// Fingerprint computation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FingerprintError {
    #[error("Invalid identity material: {0}")]
    InvalidIdentity(String),

    #[error("Fingerprint computation failed: {0}")]
    Computation(String),
}

/// Produces a deterministic fingerprint for an ordered pair of identities
#[async_trait]
pub trait FingerprintSource: Send + Sync {
    async fn fingerprint(
        &self,
        producer: &PartyIdentity,
        recipient: &PartyIdentity,
    ) -> Result<Fingerprint, FingerprintError>;
}

/// Iterated SHA-512 fingerprint over both parties' (stable id, public key)
///
/// Per party: `H = SHA-512(version_be16 || public_key || stable_id)`, then
/// `iterations - 1` rounds of `H = SHA-512(H || public_key)`, truncated to
/// 32 bytes. The fingerprint is `[version] || producer || recipient`.
#[derive(Debug, Clone)]
pub struct NumericFingerprintSource {
    iterations: u32,
}

impl NumericFingerprintSource {
    pub fn new(iterations: u32) -> Self {
        Self { iterations }
    }

    fn party_digest(&self, party: &PartyIdentity) -> [u8; PARTY_DIGEST_LEN] {
        let mut hash = Sha512::new()
            .chain_update(FINGERPRINT_VERSION.to_be_bytes())
            .chain_update(&party.public_key)
            .chain_update(&party.stable_id)
            .finalize();

        for _ in 1..self.iterations {
            hash = Sha512::new()
                .chain_update(hash)
                .chain_update(&party.public_key)
                .finalize();
        }

        let mut digest = [0u8; PARTY_DIGEST_LEN];
        digest.copy_from_slice(&hash[..PARTY_DIGEST_LEN]);
        digest
    }

    /// Blocking computation; prefer the async [`FingerprintSource`] entry point
    pub fn compute(
        &self,
        producer: &PartyIdentity,
        recipient: &PartyIdentity,
    ) -> Result<Fingerprint, FingerprintError> {
        for party in [producer, recipient] {
            if party.public_key.is_empty() {
                return Err(FingerprintError::InvalidIdentity(
                    "empty public key".to_string(),
                ));
            }
        }

        let mut bytes = Vec::with_capacity(1 + 2 * PARTY_DIGEST_LEN);
        bytes.push(FINGERPRINT_VERSION as u8);
        bytes.extend_from_slice(&self.party_digest(producer));
        bytes.extend_from_slice(&self.party_digest(recipient));
        Ok(Fingerprint(bytes))
    }
}

impl Default for NumericFingerprintSource {
    fn default() -> Self {
        Self::new(DEFAULT_ITERATIONS)
    }
}

#[async_trait]
impl FingerprintSource for NumericFingerprintSource {
    async fn fingerprint(
        &self,
        producer: &PartyIdentity,
        recipient: &PartyIdentity,
    ) -> Result<Fingerprint, FingerprintError> {
        // CPU-bound: keep it off the async workers.
        let source = self.clone();
        let producer = producer.clone();
        let recipient = recipient.clone();
        tokio::task::spawn_blocking(move || source.compute(&producer, &recipient))
            .await
            .map_err(|e| FingerprintError::Computation(e.to_string()))?
    }
}

/// Write-once, read-many holder for a session's fingerprint
///
/// Concurrent callers of [`FingerprintCell::get_or_compute`] share a single
/// computation; once set, the value is never recomputed or replaced. A failed
/// computation leaves the cell empty.
#[derive(Debug, Default)]
pub struct FingerprintCell {
    cell: OnceCell<Fingerprint>,
}

impl FingerprintCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_compute<S>(
        &self,
        source: &S,
        producer: &PartyIdentity,
        recipient: &PartyIdentity,
    ) -> Result<&Fingerprint, FingerprintError>
    where
        S: FingerprintSource + ?Sized,
    {
        self.cell
            .get_or_try_init(|| source.fingerprint(producer, recipient))
            .await
    }

    pub fn get(&self) -> Option<&Fingerprint> {
        self.cell.get()
    }
}
