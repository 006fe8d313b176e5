//! Message transport boundary
//!
//! A produced bundle travels to the peer as the body of an ordinary secure
//! message. Composing, encrypting and delivering it belong to the host.

use crate::identity::PeerRef;
use crate::session::ProducedBundle;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Transport errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Recipient {0} cannot receive messages")]
    UnknownRecipient(PeerRef),

    #[error("Transport unavailable: {0}")]
    Unavailable(String),
}

/// Outgoing message carrying a token bundle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingBundleMessage {
    pub recipient: PeerRef,
    /// Bundle wire string
    pub body: String,
    pub sent_at_millis: u64,
    /// Disappearing-message timer; 0 disables
    pub expires_in_secs: u64,
}

impl OutgoingBundleMessage {
    pub fn from_bundle(
        recipient: PeerRef,
        bundle: &ProducedBundle,
        sent_at_millis: u64,
        expires_in_secs: u64,
    ) -> Self {
        Self {
            recipient,
            body: bundle.to_wire(),
            sent_at_millis,
            expires_in_secs,
        }
    }

    /// Timestamp suitable for evaluating token expiry on receipt
    pub fn sent_at_secs(&self) -> u64 {
        self.sent_at_millis / 1000
    }
}

/// Host message transport
#[async_trait]
pub trait MessageTransport: Send + Sync {
    async fn send(&self, message: &OutgoingBundleMessage) -> Result<(), TransportError>;
}

/// Records messages instead of sending them
#[derive(Clone, Default)]
pub struct MockTransport {
    sent: Arc<Mutex<Vec<OutgoingBundleMessage>>>,
    offline: Arc<Mutex<bool>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offline(&self, offline: bool) {
        *self.offline.lock().unwrap() = offline;
    }

    pub fn sent(&self) -> Vec<OutgoingBundleMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageTransport for MockTransport {
    async fn send(&self, message: &OutgoingBundleMessage) -> Result<(), TransportError> {
        if *self.offline.lock().unwrap() {
            return Err(TransportError::Unavailable("mock transport offline".to_string()));
        }
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}
