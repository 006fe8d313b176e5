//! Integration tests for the end-to-end binding flow.
//!
//! Alice runs ceremonies against mock providers and sends the bundle to Bob;
//! Bob verifies it against his own view of both identities:
//! 1. Alice selects providers and produces a bundle
//! 2. The bundle travels as an outgoing message body
//! 3. Bob verifies every token against his locally derived fingerprint
//! 4. Alice can re-check her own sent bundle

use idbind::bundle::TokenBundle;
use idbind::fingerprint::NumericFingerprintSource;
use idbind::identity::{MockIdentitySource, PartyIdentity, PeerRef, Role};
use idbind::metadata::{MockIssuer, MockMetadataResolver};
use idbind::nonce::{NonceBinder, Salt};
use idbind::oidc::{MockOidcClient, MockProviderBehavior};
use idbind::provider::ProviderRegistry;
use idbind::session::{ProducedBundle, SessionController};
use idbind::transport::{MessageTransport, MockTransport, OutgoingBundleMessage};
use idbind::verify::{VerificationEngine, VerificationFailure};
use serde_json::json;
use std::sync::Arc;

const ITERATIONS: u32 = 16;
const CLIENT_ID: &str = "idbind-client";

type Session = SessionController<MockIdentitySource, NumericFingerprintSource, MockOidcClient>;
type Engine = VerificationEngine<MockIdentitySource, NumericFingerprintSource, MockMetadataResolver>;

fn alice() -> PartyIdentity {
    PartyIdentity::new(b"alice-aci".to_vec(), vec![0x05; 33])
}

fn bob() -> PartyIdentity {
    PartyIdentity::new(b"bob-aci".to_vec(), vec![0x06; 33])
}

fn issuers() -> Vec<(&'static str, MockIssuer)> {
    vec![
        (
            "Alpha",
            MockIssuer::new(
                "https://alpha.example.com",
                "alpha-1",
                b"alpha-provider-signing-key-000000",
            ),
        ),
        (
            "Beta",
            MockIssuer::new(
                "https://beta.example.com/tenant/v2.0",
                "beta-1",
                b"beta-provider-signing-key-0000000",
            ),
        ),
    ]
}

/// Both parties plus the shared provider world
struct World {
    registry: Arc<ProviderRegistry>,
    resolver: MockMetadataResolver,
    oidc: MockOidcClient,
    alice_view: MockIdentitySource,
    bob_view: MockIdentitySource,
}

impl World {
    fn new() -> Self {
        let resolver = MockMetadataResolver::new();
        let oidc = MockOidcClient::new();
        let mut providers = Vec::new();
        for (name, issuer) in issuers() {
            resolver.add_issuer(&issuer);
            providers.push(issuer.provider(name, CLIENT_ID));
            oidc.register(name, issuer, "alice@example.com");
        }

        let alice_view = MockIdentitySource::new(alice());
        alice_view.set_peer(PeerRef::from("bob"), bob());
        let bob_view = MockIdentitySource::new(bob());
        bob_view.set_peer(PeerRef::from("alice"), alice());

        Self {
            registry: Arc::new(ProviderRegistry::new(providers)),
            resolver,
            oidc,
            alice_view,
            bob_view,
        }
    }

    fn alice_session(&self) -> Session {
        SessionController::new(
            PeerRef::from("bob"),
            self.alice_view.clone(),
            NumericFingerprintSource::new(ITERATIONS),
            self.oidc.clone(),
            Arc::clone(&self.registry),
        )
    }

    fn engine(&self, view: &MockIdentitySource) -> Engine {
        VerificationEngine::new(
            view.clone(),
            NumericFingerprintSource::new(ITERATIONS),
            self.resolver.clone(),
            Arc::clone(&self.registry),
        )
    }

    async fn produce(&self, providers: &[&str]) -> ProducedBundle {
        let selection: Vec<String> = providers.iter().map(|s| s.to_string()).collect();
        Arc::new(self.alice_session())
            .spawn(selection)
            .finished()
            .await
            .unwrap()
    }
}

#[tokio::test]
async fn test_bundle_verifies_on_both_sides() {
    let world = World::new();
    let bundle = world.produce(&["Alpha", "Beta"]).await;
    assert_eq!(bundle.tokens.len(), 2);

    let transport = MockTransport::new();
    let message =
        OutgoingBundleMessage::from_bundle(PeerRef::from("bob"), &bundle, 1_700_000_000_000, 0);
    transport.send(&message).await.unwrap();
    let received = transport.sent().remove(0);

    let outcomes = world
        .engine(&world.bob_view)
        .verify_bundle(&received.body, &PeerRef::from("alice"), Role::Verifier)
        .await
        .unwrap();

    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.iter().all(|o| o.verified));
    assert!(outcomes.iter().all(|o| o.claimed_identity == "alice@example.com"));
    let providers: Vec<_> = outcomes.iter().map(|o| o.provider.display_id.as_str()).collect();
    assert_eq!(providers, vec!["Alpha", "Beta"]);

    // Alice re-checking her own sent message.
    let outcomes = world
        .engine(&world.alice_view)
        .verify_bundle(&received.body, &PeerRef::from("bob"), Role::Producer)
        .await
        .unwrap();
    assert!(outcomes.iter().all(|o| o.verified));
}

#[tokio::test]
async fn test_stale_key_material_fails_deterministically() {
    let world = World::new();
    let bundle = world.produce(&["Alpha"]).await;

    // Bob still holds an old key for Alice.
    world.bob_view.set_peer(
        PeerRef::from("alice"),
        PartyIdentity::new(b"alice-aci".to_vec(), vec![0x07; 33]),
    );
    let engine = world.engine(&world.bob_view);

    for _ in 0..2 {
        let outcomes = engine
            .verify_bundle(&bundle.to_wire(), &PeerRef::from("alice"), Role::Verifier)
            .await
            .unwrap();
        assert_eq!(outcomes.len(), 1);
        assert!(!outcomes[0].verified);
        assert_eq!(outcomes[0].failure, Some(VerificationFailure::NonceMismatch));
        assert_eq!(outcomes[0].claimed_identity, "alice@example.com");
    }

    // Wrong role: the fingerprint order flips and nothing binds.
    world.bob_view.set_peer(PeerRef::from("alice"), alice());
    let outcomes = engine
        .verify_bundle(&bundle.to_wire(), &PeerRef::from("alice"), Role::Producer)
        .await
        .unwrap();
    assert!(!outcomes[0].verified);
}

#[tokio::test]
async fn test_second_provider_mismatch_leaves_one_token() {
    let world = World::new();
    world.oidc.set_behavior("Beta", MockProviderBehavior::WrongNonce);

    let bundle = world.produce(&["Alpha", "Beta"]).await;
    assert_eq!(bundle.tokens.len(), 1);

    let outcomes = world
        .engine(&world.bob_view)
        .verify_bundle(&bundle.to_wire(), &PeerRef::from("alice"), Role::Verifier)
        .await
        .unwrap();
    assert_eq!(outcomes.len(), 1);
    assert!(outcomes[0].verified);
    assert_eq!(outcomes[0].provider.display_id, "Alpha");
}

#[tokio::test]
async fn test_token_replayed_into_later_bundle_fails() {
    let world = World::new();
    let first = world.produce(&["Alpha"]).await;
    let second = world.produce(&["Beta"]).await;
    assert_ne!(first.salt, second.salt);

    let replayed = TokenBundle::new(
        second.salt.clone(),
        vec![first.tokens[0].clone(), second.tokens[0].clone()],
    );

    let outcomes = world
        .engine(&world.bob_view)
        .verify_bundle(&replayed.to_wire(), &PeerRef::from("alice"), Role::Verifier)
        .await
        .unwrap();

    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes[0].failure, Some(VerificationFailure::NonceMismatch));
    assert!(outcomes[1].verified);
}

#[tokio::test]
async fn test_zero_tokens_and_unknown_issuers() {
    let world = World::new();
    let engine = world.engine(&world.bob_view);
    let alice_ref = PeerRef::from("alice");

    let empty = world.produce(&[]).await;
    assert!(empty.is_empty());
    assert!(engine
        .verify_bundle(&empty.to_wire(), &alice_ref, Role::Verifier)
        .await
        .unwrap()
        .is_empty());

    let bundle = world.produce(&["Alpha"]).await;
    let outsider = MockIssuer::new(
        "https://outsider.example.com",
        "o-1",
        b"gamma-provider-signing-key-000000",
    );
    let unknown = outsider.sign(&json!({
        "iss": outsider.issuer,
        "aud": CLIENT_ID,
        "email": "mallory@example.com",
    }));
    let mixed = TokenBundle::new(bundle.salt.clone(), vec![unknown, bundle.tokens[0].clone()]);

    let outcomes = engine
        .verify_bundle(&mixed.to_wire(), &alice_ref, Role::Verifier)
        .await
        .unwrap();
    assert_eq!(outcomes.len(), 1);
    assert!(outcomes[0].verified);

    let report = engine
        .verify_bundle_report(&mixed.to_wire(), &alice_ref, Role::Verifier)
        .await
        .unwrap();
    assert_eq!(report.unevaluated, 1);
}

#[tokio::test]
async fn test_empty_salt_bundle_verifies() {
    let world = World::new();
    let (_, issuer) = issuers().remove(0);

    let fingerprint = NumericFingerprintSource::new(ITERATIONS)
        .compute(&alice(), &bob())
        .unwrap();
    let nonce = NonceBinder::new().fresh_nonce(&fingerprint, &Salt::from_bytes(Vec::new()));
    let token = issuer.sign(&json!({
        "iss": issuer.issuer,
        "aud": CLIENT_ID,
        "email": "alice@example.com",
        "nonce": nonce.as_str(),
    }));

    let wire = format!("?{}", token);
    let outcomes = world
        .engine(&world.bob_view)
        .verify_bundle(&wire, &PeerRef::from("alice"), Role::Verifier)
        .await
        .unwrap();

    assert_eq!(outcomes.len(), 1);
    assert!(outcomes[0].verified);
}

#[tokio::test]
async fn test_expiry_evaluated_at_message_time() {
    let world = World::new();
    let bundle = world.produce(&["Alpha"]).await;
    let engine = world.engine(&world.bob_view);
    let alice_ref = PeerRef::from("alice");

    let sent_at = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs();
    let report = engine
        .verify_bundle_at(&bundle.to_wire(), &alice_ref, Role::Verifier, sent_at)
        .await
        .unwrap();
    assert!(report.outcomes[0].verified);

    let report = engine
        .verify_bundle_at(&bundle.to_wire(), &alice_ref, Role::Verifier, sent_at + 86_400)
        .await
        .unwrap();
    assert_eq!(report.outcomes[0].failure, Some(VerificationFailure::Expired));
}
