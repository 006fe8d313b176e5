//! Party identities and the identity source collaborator
//!
//! The binding protocol never looks inside identity material: a party is a
//! stable identifier plus a public identity key, both opaque bytes. The host
//! messenger supplies them through [`IdentitySource`].

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

pub mod mock;

pub use mock::MockIdentitySource;

/// Opaque reference to the conversation partner (host-assigned)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerRef(pub String);

impl fmt::Display for PeerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PeerRef {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Stable identifier and public identity key of one party
///
/// Both fields are wiped when the value is dropped.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct PartyIdentity {
    pub stable_id: Vec<u8>,
    pub public_key: Vec<u8>,
}

impl PartyIdentity {
    pub fn new(stable_id: impl Into<Vec<u8>>, public_key: impl Into<Vec<u8>>) -> Self {
        Self {
            stable_id: stable_id.into(),
            public_key: public_key.into(),
        }
    }
}

// Key material stays out of logs.
impl fmt::Debug for PartyIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartyIdentity")
            .field("stable_id", &hex::encode(&self.stable_id))
            .field("public_key_len", &self.public_key.len())
            .finish()
    }
}

/// Which side of a token bundle the local party is on
///
/// The fingerprint is always computed over the ordered pair
/// (bundle producer, bundle recipient), so both parties derive the same bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// The local party produced the bundle (e.g. re-checking a sent message)
    Producer,
    /// The peer produced the bundle and the local party received it
    Verifier,
}

impl Role {
    /// Orders `(local, peer)` into `(producer, recipient)`
    pub fn order<'a>(
        self,
        local: &'a PartyIdentity,
        peer: &'a PartyIdentity,
    ) -> (&'a PartyIdentity, &'a PartyIdentity) {
        match self {
            Role::Producer => (local, peer),
            Role::Verifier => (peer, local),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "producer" | "sent" => Ok(Role::Producer),
            "verifier" | "received" => Ok(Role::Verifier),
            other => Err(format!("unknown role '{}' (expected producer or verifier)", other)),
        }
    }
}

/// Result type for identity lookups
pub type IdentityResult<T> = Result<T, IdentityError>;

/// Identity lookup errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    #[error("No identity record for peer {0}")]
    NotFound(PeerRef),

    #[error("Local identity unavailable: {0}")]
    SelfUnavailable(String),
}

/// Source of identity material, provided by the host messenger
#[async_trait]
pub trait IdentitySource: Send + Sync {
    /// The local party's identity
    async fn self_identity(&self) -> IdentityResult<PartyIdentity>;

    /// The currently trusted identity of a peer
    async fn peer_identity(&self, peer: &PeerRef) -> IdentityResult<PartyIdentity>;
}

/// Fixed identity table: one local identity and any number of known peers
///
/// Used by the CLI, where identities are passed on the command line.
#[derive(Debug, Clone)]
pub struct StaticIdentitySource {
    local: PartyIdentity,
    peers: HashMap<PeerRef, PartyIdentity>,
}

impl StaticIdentitySource {
    pub fn new(local: PartyIdentity) -> Self {
        Self {
            local,
            peers: HashMap::new(),
        }
    }

    pub fn with_peer(mut self, peer: PeerRef, identity: PartyIdentity) -> Self {
        self.peers.insert(peer, identity);
        self
    }
}

#[async_trait]
impl IdentitySource for StaticIdentitySource {
    async fn self_identity(&self) -> IdentityResult<PartyIdentity> {
        Ok(self.local.clone())
    }

    async fn peer_identity(&self, peer: &PeerRef) -> IdentityResult<PartyIdentity> {
        self.peers
            .get(peer)
            .cloned()
            .ok_or_else(|| IdentityError::NotFound(peer.clone()))
    }
}
