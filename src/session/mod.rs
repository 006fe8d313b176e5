//! Outbound identity-binding ceremony
//!
//! One session binds tokens for one peer. Selected providers run strictly in
//! order, one authorization round trip in flight at a time. Each ceremony
//! gets a fresh true nonce under the session salt; the echoed nonce must
//! equal it exactly, after which it is consumed.
//!
//! Only identity and fingerprint failures end the session. Anything that
//! goes wrong inside a single ceremony skips that provider.

use crate::bundle::TokenBundle;
use crate::claims::{unverified_nonce, ClaimError};
use crate::fingerprint::{Fingerprint, FingerprintCell, FingerprintError, FingerprintSource};
use crate::identity::{IdentityError, IdentitySource, PeerRef, Role};
use crate::nonce::{NonceBinder, PendingNonce, Salt};
use crate::oidc::{AuthorizationRequest, OidcClient, OidcError};
use crate::provider::{Provider, ProviderRegistry};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Session errors
///
/// `Identity` and `FingerprintUnavailable` are returned; the rest only ever
/// appear in logs, for the provider they skipped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("Identity lookup failed: {0}")]
    Identity(#[from] IdentityError),

    #[error("Fingerprint unavailable: {0}")]
    FingerprintUnavailable(#[from] FingerprintError),

    #[error("OIDC client error: {0}")]
    Oidc(#[from] OidcError),

    #[error("Returned token unreadable: {0}")]
    Token(#[from] ClaimError),

    #[error("Returned token carries no nonce")]
    MissingNonce,

    #[error("Returned token nonce does not match the request")]
    NonceMismatch,

    #[error("Ceremony task aborted: {0}")]
    Aborted(String),
}

/// Salt and tokens ready for message assembly
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducedBundle {
    pub salt: Salt,
    pub tokens: Vec<String>,
}

impl ProducedBundle {
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn to_wire(&self) -> String {
        TokenBundle::new(self.salt.clone(), self.tokens.clone()).to_wire()
    }
}

impl From<ProducedBundle> for TokenBundle {
    fn from(bundle: ProducedBundle) -> Self {
        TokenBundle::new(bundle.salt, bundle.tokens)
    }
}

/// Drives ceremonies for one peer and collects the resulting tokens
pub struct SessionController<I, F, O> {
    peer: PeerRef,
    identities: I,
    fingerprints: F,
    oidc: O,
    registry: Arc<ProviderRegistry>,
    binder: Arc<NonceBinder>,
    salt: Salt,
    fingerprint: FingerprintCell,
    // Held for a whole queue: one authorization round trip per session.
    in_flight: Mutex<()>,
}

impl<I, F, O> SessionController<I, F, O>
where
    I: IdentitySource,
    F: FingerprintSource,
    O: OidcClient,
{
    /// New session with a fresh salt
    pub fn new(
        peer: PeerRef,
        identities: I,
        fingerprints: F,
        oidc: O,
        registry: Arc<ProviderRegistry>,
    ) -> Self {
        Self {
            peer,
            identities,
            fingerprints,
            oidc,
            registry,
            binder: Arc::new(NonceBinder::new()),
            salt: Salt::generate(),
            fingerprint: FingerprintCell::new(),
            in_flight: Mutex::new(()),
        }
    }

    pub fn with_binder(mut self, binder: Arc<NonceBinder>) -> Self {
        self.binder = binder;
        self
    }

    pub fn peer(&self) -> &PeerRef {
        &self.peer
    }

    pub fn salt(&self) -> &Salt {
        &self.salt
    }

    /// Session fingerprint over (self, peer), computed on first use
    pub async fn fingerprint(&self) -> Result<&Fingerprint, SessionError> {
        if let Some(fingerprint) = self.fingerprint.get() {
            return Ok(fingerprint);
        }

        let (local, remote) = tokio::try_join!(
            self.identities.self_identity(),
            self.identities.peer_identity(&self.peer)
        )?;
        let (producer, recipient) = Role::Producer.order(&local, &remote);

        Ok(self
            .fingerprint
            .get_or_compute(&self.fingerprints, producer, recipient)
            .await?)
    }

    /// Run one ceremony per selected provider, in order
    ///
    /// Unknown display ids are skipped. The result may hold fewer tokens
    /// than providers selected, including none. Concurrent calls on one
    /// session queue behind each other.
    pub async fn produce_bundle(&self, display_ids: &[String]) -> Result<ProducedBundle, SessionError> {
        let span = info_span!("produce_bundle", session = %Uuid::new_v4(), peer = %self.peer);
        self.run_queue(display_ids).instrument(span).await
    }

    async fn run_queue(&self, display_ids: &[String]) -> Result<ProducedBundle, SessionError> {
        let _in_flight = self.in_flight.lock().await;
        let providers = self.registry.select(display_ids);
        let mut tokens = Vec::with_capacity(providers.len());

        for provider in &providers {
            let fingerprint = self.fingerprint().await?;
            let pending = PendingNonce::new(self.binder.fresh_nonce(fingerprint, &self.salt));

            match self.ceremony(provider, pending).await {
                Ok(token) => {
                    info!(provider = %provider.display_id, "ceremony produced token");
                    tokens.push(token);
                }
                Err(e) => {
                    warn!(provider = %provider.display_id, error = %e, "skipping provider");
                }
            }
        }

        info!(
            selected = display_ids.len(),
            produced = tokens.len(),
            "ceremony queue drained"
        );
        Ok(ProducedBundle {
            salt: self.salt.clone(),
            tokens,
        })
    }

    /// One authorization round trip; `pending` is consumed on every path
    async fn ceremony(&self, provider: &Provider, pending: PendingNonce) -> Result<String, SessionError> {
        let request = AuthorizationRequest::new(provider.clone(), pending.as_str());
        debug!(provider = %provider.display_id, "starting authorization");

        let authorization = self.oidc.begin_authorization(&request).await?;
        let token = self.oidc.exchange_code(authorization).await?;

        let echoed = unverified_nonce(&token)?.ok_or(SessionError::MissingNonce)?;
        if pending.matches(&echoed) {
            Ok(token)
        } else {
            Err(SessionError::NonceMismatch)
        }
    }
}

impl<I, F, O> SessionController<I, F, O>
where
    I: IdentitySource + 'static,
    F: FingerprintSource + 'static,
    O: OidcClient + 'static,
{
    /// Run [`produce_bundle`](Self::produce_bundle) on a background task
    pub fn spawn(self: Arc<Self>, display_ids: Vec<String>) -> CeremonyHandle {
        let task = tokio::spawn(async move { self.produce_bundle(&display_ids).await });
        CeremonyHandle { task }
    }
}

/// Handle to a spawned ceremony queue
///
/// Dropping the handle abandons the session: the task is aborted and any
/// in-flight OIDC call is dropped with it.
#[derive(Debug)]
pub struct CeremonyHandle {
    task: JoinHandle<Result<ProducedBundle, SessionError>>,
}

impl CeremonyHandle {
    /// Completion signal for the whole queue
    pub async fn finished(mut self) -> Result<ProducedBundle, SessionError> {
        match (&mut self.task).await {
            Ok(result) => result,
            Err(e) => Err(SessionError::Aborted(e.to_string())),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub fn abort(&self) {
        self.task.abort();
    }
}

impl Drop for CeremonyHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::NumericFingerprintSource;
    use crate::identity::{MockIdentitySource, PartyIdentity};
    use crate::metadata::MockIssuer;
    use crate::nonce::parse_nonce;
    use crate::oidc::{AuthorizationResult, MockOidcClient, MockProviderBehavior};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const ITERATIONS: u32 = 8;

    type TestSession = SessionController<MockIdentitySource, NumericFingerprintSource, MockOidcClient>;

    fn alice() -> PartyIdentity {
        PartyIdentity::new(b"alice".to_vec(), vec![0x05; 33])
    }

    fn bob() -> PartyIdentity {
        PartyIdentity::new(b"bob".to_vec(), vec![0x06; 33])
    }

    fn issuers() -> Vec<(&'static str, MockIssuer)> {
        vec![
            (
                "Alpha",
                MockIssuer::new(
                    "https://alpha.example.com",
                    "a1",
                    b"alpha-provider-signing-key-000000",
                ),
            ),
            (
                "Beta",
                MockIssuer::new(
                    "https://beta.example.com",
                    "b1",
                    b"beta-provider-signing-key-0000000",
                ),
            ),
        ]
    }

    fn session() -> (TestSession, MockOidcClient, MockIdentitySource) {
        let oidc = MockOidcClient::new();
        let mut providers = Vec::new();
        for (name, issuer) in issuers() {
            providers.push(issuer.provider(name, "client"));
            oidc.register(name, issuer, "alice@example.com");
        }

        let identities = MockIdentitySource::new(alice());
        identities.set_peer(PeerRef::from("bob"), bob());

        let session = SessionController::new(
            PeerRef::from("bob"),
            identities.clone(),
            NumericFingerprintSource::new(ITERATIONS),
            oidc.clone(),
            Arc::new(ProviderRegistry::new(providers)),
        );
        (session, oidc, identities)
    }

    /// Slow client recording the most authorizations seen in flight at once
    #[derive(Clone)]
    struct CountingClient {
        inner: MockOidcClient,
        active: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl OidcClient for CountingClient {
        async fn begin_authorization(
            &self,
            request: &AuthorizationRequest,
        ) -> Result<AuthorizationResult, OidcError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            let result = self.inner.begin_authorization(request).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            result
        }

        async fn exchange_code(&self, result: AuthorizationResult) -> Result<String, OidcError> {
            self.inner.exchange_code(result).await
        }
    }

    fn select(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_one_token_per_provider() {
        let (session, oidc, _) = session();
        let bundle = session.produce_bundle(&select(&["Alpha", "Beta"])).await.unwrap();

        assert_eq!(bundle.tokens.len(), 2);
        assert_eq!(&bundle.salt, session.salt());

        let requests = oidc.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests.iter().all(|r| r.scope == "openid email"));

        // Fresh true nonce per ceremony, same bound hash.
        let (t1, h1) = parse_nonce(&requests[0].nonce).unwrap();
        let (t2, h2) = parse_nonce(&requests[1].nonce).unwrap();
        assert_ne!(t1.as_bytes(), t2.as_bytes());
        assert_eq!(h1, h2);
    }

    #[tokio::test]
    async fn test_mismatched_provider_is_skipped() {
        let (session, oidc, _) = session();
        oidc.set_behavior("Beta", MockProviderBehavior::WrongNonce);

        let bundle = session.produce_bundle(&select(&["Alpha", "Beta"])).await.unwrap();
        assert_eq!(bundle.tokens.len(), 1);
        assert_eq!(oidc.exchanges(), 2);
    }

    #[tokio::test]
    async fn test_replayed_nonce_is_rejected() {
        let (session, oidc, _) = session();
        oidc.set_behavior("Beta", MockProviderBehavior::ReplayPrevious);

        let bundle = session.produce_bundle(&select(&["Alpha", "Beta"])).await.unwrap();
        assert_eq!(bundle.tokens.len(), 1);
        assert_eq!(
            unverified_nonce(&bundle.tokens[0]).unwrap().as_deref(),
            Some(oidc.requests()[0].nonce.as_str())
        );
    }

    #[tokio::test]
    async fn test_ceremony_failures_are_not_fatal() {
        for behavior in [
            MockProviderBehavior::Cancel,
            MockProviderBehavior::FailExchange,
            MockProviderBehavior::OmitNonce,
        ] {
            let (session, oidc, _) = session();
            oidc.set_behavior("Alpha", behavior);

            let bundle = session.produce_bundle(&select(&["Alpha", "Beta"])).await.unwrap();
            assert_eq!(bundle.tokens.len(), 1, "{:?}", behavior);
        }
    }

    #[tokio::test]
    async fn test_unknown_selection_and_empty_queue() {
        let (session, oidc, identities) = session();

        let bundle = session.produce_bundle(&select(&["Nope"])).await.unwrap();
        assert!(bundle.is_empty());
        assert!(oidc.requests().is_empty());
        assert_eq!(identities.peer_lookups(), 0);
        assert_eq!(bundle.to_wire(), format!("{}?", session.salt().to_base64()));
    }

    #[tokio::test]
    async fn test_missing_peer_is_fatal() {
        let (session, _, identities) = session();
        identities.remove_peer(&PeerRef::from("bob"));

        let result = session.produce_bundle(&select(&["Alpha"])).await;
        assert_eq!(
            result,
            Err(SessionError::Identity(IdentityError::NotFound(
                PeerRef::from("bob")
            )))
        );
    }

    #[tokio::test]
    async fn test_invalid_identity_material_is_fatal() {
        let (session, oidc, identities) = session();
        identities.set_peer(PeerRef::from("bob"), PartyIdentity::new(b"bob".to_vec(), Vec::new()));

        let result = session.produce_bundle(&select(&["Alpha"])).await;
        assert!(matches!(
            result,
            Err(SessionError::FingerprintUnavailable(
                FingerprintError::InvalidIdentity(_)
            ))
        ));
        assert!(oidc.requests().is_empty());
    }

    #[tokio::test]
    async fn test_missing_local_identity_is_fatal() {
        let (_, oidc, _) = session();
        let identities = MockIdentitySource::without_self();
        identities.set_peer(PeerRef::from("bob"), bob());
        let session = SessionController::new(
            PeerRef::from("bob"),
            identities,
            NumericFingerprintSource::new(ITERATIONS),
            oidc.clone(),
            Arc::new(ProviderRegistry::new(
                issuers()
                    .into_iter()
                    .map(|(name, issuer)| issuer.provider(name, "client"))
                    .collect(),
            )),
        );

        let result = session.produce_bundle(&select(&["Alpha"])).await;
        assert!(matches!(
            result,
            Err(SessionError::Identity(IdentityError::SelfUnavailable(_)))
        ));
        assert!(oidc.requests().is_empty());
    }

    #[tokio::test]
    async fn test_one_authorization_in_flight_per_session() {
        let (_, inner, identities) = session();
        let client = CountingClient {
            inner,
            active: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        };
        let providers = issuers()
            .into_iter()
            .map(|(name, issuer)| issuer.provider(name, "client"))
            .collect();
        let session = Arc::new(SessionController::new(
            PeerRef::from("bob"),
            identities,
            NumericFingerprintSource::new(ITERATIONS),
            client.clone(),
            Arc::new(ProviderRegistry::new(providers)),
        ));

        let first = Arc::clone(&session).spawn(select(&["Alpha", "Beta"]));
        let second = Arc::clone(&session).spawn(select(&["Alpha", "Beta"]));
        let (first, second) = tokio::join!(first.finished(), second.finished());

        assert_eq!(first.unwrap().tokens.len(), 2);
        assert_eq!(second.unwrap().tokens.len(), 2);
        assert_eq!(client.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fingerprint_computed_once() {
        let (session, _, identities) = session();
        session.produce_bundle(&select(&["Alpha", "Beta"])).await.unwrap();
        session.produce_bundle(&select(&["Alpha"])).await.unwrap();

        assert_eq!(identities.peer_lookups(), 1);
        assert_eq!(
            session.fingerprint().await.unwrap(),
            &NumericFingerprintSource::new(ITERATIONS)
                .compute(&alice(), &bob())
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_spawned_queue_signals_completion() {
        let (session, _, _) = session();
        let handle = Arc::new(session).spawn(select(&["Alpha", "Beta"]));

        let bundle = handle.finished().await.unwrap();
        assert_eq!(bundle.tokens.len(), 2);
    }

    #[tokio::test]
    async fn test_dropping_handle_abandons_hung_ceremony() {
        let (session, oidc, _) = session();
        oidc.set_behavior("Alpha", MockProviderBehavior::Hang);
        let session = Arc::new(session);

        let handle = Arc::clone(&session).spawn(select(&["Alpha", "Beta"]));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_finished());
        drop(handle);

        // The aborted task releases its clone of the session.
        tokio::time::timeout(Duration::from_secs(5), async {
            while Arc::strong_count(&session) > 1 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert_eq!(oidc.exchanges(), 0);
    }
}
