//! Property-based tests for nonce binding
//!
//! Tests for:
//! - Determinism and output length of the stretch
//! - Salt separation: different salts give different hashes
//! - format/parse round trip returns the true nonce and the stretch

use super::*;
use proptest::prelude::*;

proptest! {
    // 1024 SHA-512 rounds per case; keep the case count modest.
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_stretch_deterministic(
        fingerprint in prop::collection::vec(any::<u8>(), 0..80),
        salt in prop::collection::vec(any::<u8>(), 0..40),
    ) {
        let a = stretch(&fingerprint, &salt);
        let b = stretch(&fingerprint, &salt);
        prop_assert_eq!(a, b);
        prop_assert_eq!(a.as_bytes().len(), HASH_LEN);
    }

    #[test]
    fn prop_distinct_salts_separate(
        fingerprint in prop::collection::vec(any::<u8>(), 1..80),
        salt1 in prop::array::uniform32(any::<u8>()),
        salt2 in prop::array::uniform32(any::<u8>()),
    ) {
        prop_assume!(salt1 != salt2);
        prop_assert_ne!(stretch(&fingerprint, &salt1), stretch(&fingerprint, &salt2));
    }

    #[test]
    fn prop_format_parse_roundtrip(
        true_nonce in prop::array::uniform32(any::<u8>()),
        fingerprint in prop::collection::vec(any::<u8>(), 1..80),
        salt in prop::collection::vec(any::<u8>(), 0..40),
    ) {
        let fingerprint = Fingerprint::from_bytes(fingerprint);
        let salt = Salt::from_bytes(salt);
        let nonce = format_nonce(&TrueNonce::from_bytes(true_nonce), &fingerprint, &salt);

        let (parsed_nonce, parsed_hash) = parse_nonce(nonce.as_str()).unwrap();
        prop_assert_eq!(parsed_nonce.as_bytes(), &true_nonce);
        prop_assert_eq!(parsed_hash, stretch(fingerprint.as_bytes(), salt.as_bytes()));
    }

    #[test]
    fn prop_parse_never_panics(input in ".{0,120}") {
        let _ = parse_nonce(&input);
    }
}
