//! Mock identity source for testing
//!
//! Lets tests swap a peer's key mid-session to model stale key material.

use super::*;
use std::sync::{Arc, Mutex};

/// Mock identity source with mutable peer records
#[derive(Clone)]
pub struct MockIdentitySource {
    state: Arc<Mutex<MockState>>,
}

struct MockState {
    local: Option<PartyIdentity>,
    peers: HashMap<PeerRef, PartyIdentity>,
    lookups: usize,
}

impl MockIdentitySource {
    /// Create mock with the given local identity
    pub fn new(local: PartyIdentity) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                local: Some(local),
                peers: HashMap::new(),
                lookups: 0,
            })),
        }
    }

    /// Create mock whose local identity is unavailable
    pub fn without_self() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                local: None,
                peers: HashMap::new(),
                lookups: 0,
            })),
        }
    }

    /// Add or replace a peer record
    pub fn set_peer(&self, peer: PeerRef, identity: PartyIdentity) {
        let mut state = self.state.lock().unwrap();
        state.peers.insert(peer, identity);
    }

    /// Forget a peer record
    pub fn remove_peer(&self, peer: &PeerRef) {
        self.state.lock().unwrap().peers.remove(peer);
    }

    /// Number of peer lookups served (for assertions)
    pub fn peer_lookups(&self) -> usize {
        self.state.lock().unwrap().lookups
    }
}

#[async_trait]
impl IdentitySource for MockIdentitySource {
    async fn self_identity(&self) -> IdentityResult<PartyIdentity> {
        self.state
            .lock()
            .unwrap()
            .local
            .clone()
            .ok_or_else(|| IdentityError::SelfUnavailable("mock has no local identity".into()))
    }

    async fn peer_identity(&self, peer: &PeerRef) -> IdentityResult<PartyIdentity> {
        let mut state = self.state.lock().unwrap();
        state.lookups += 1;
        state
            .peers
            .get(peer)
            .cloned()
            .ok_or_else(|| IdentityError::NotFound(peer.clone()))
    }
}
