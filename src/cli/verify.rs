use super::config::IdbindConfig;
use super::IdentityArgs;
use idbind::fingerprint::NumericFingerprintSource;
use idbind::identity::{PeerRef, Role, StaticIdentitySource};
use idbind::metadata::HttpMetadataResolver;
use idbind::verify::{VerificationEngine, VerificationReport};
use std::fs;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Verify a received (or sent) token bundle
pub async fn execute(
    bundle: String,
    identities: IdentityArgs,
    role: Role,
    at: Option<u64>,
    json: bool,
    config: &IdbindConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let wire = read_bundle(&bundle)?;
    let (local, peer_identity) = identities.identities()?;
    let peer = PeerRef(identities.peer_id.clone());

    let source = StaticIdentitySource::new(local).with_peer(peer.clone(), peer_identity);
    let resolver = HttpMetadataResolver::new(
        config.metadata.timeout,
        config.metadata.require_https,
    );
    let engine = VerificationEngine::new(
        source,
        NumericFingerprintSource::default(),
        resolver,
        Arc::new(config.registry()),
    )
    .with_config(config.verification.verifier_config(unix_now()));

    let report = match at {
        Some(at) => engine.verify_bundle_at(&wire, &peer, role, at).await?,
        None => engine.verify_bundle_report(&wire, &peer, role).await?,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

/// Bundle text, or the contents of the file named after a leading `@`
fn read_bundle(arg: &str) -> Result<String, Box<dyn std::error::Error>> {
    match arg.strip_prefix('@') {
        Some(path) => Ok(fs::read_to_string(path)
            .map_err(|e| format!("Failed to read bundle file '{}': {}", path, e))?
            .trim()
            .to_string()),
        None => Ok(arg.to_string()),
    }
}

fn print_report(report: &VerificationReport) {
    if report.outcomes.is_empty() {
        println!("No identity claims could be evaluated");
    }

    for outcome in &report.outcomes {
        match &outcome.failure {
            None => println!(
                "✅ {} via {}",
                outcome.claimed_identity, outcome.provider.display_id
            ),
            Some(failure) => println!(
                "❌ {} via {}: {}",
                outcome.claimed_identity, outcome.provider.display_id, failure
            ),
        }
    }

    if report.unevaluated > 0 {
        println!("⚠️  {} token(s) could not be evaluated", report.unevaluated);
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_read_bundle_inline_and_file() {
        assert_eq!(read_bundle("abc?x.y.z").unwrap(), "abc?x.y.z");

        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bundle.txt");
        fs::write(&path, "abc?x.y.z\n").unwrap();
        assert_eq!(
            read_bundle(&format!("@{}", path.display())).unwrap(),
            "abc?x.y.z"
        );

        assert!(read_bundle("@/definitely/not/here").is_err());
    }

    #[tokio::test]
    async fn test_malformed_bundle_reports_nothing() {
        let identities = IdentityArgs {
            self_id: "alice".to_string(),
            self_key: "05aa".to_string(),
            peer_id: "bob".to_string(),
            peer_key: "05bb".to_string(),
        };

        let result = execute(
            "no separator".to_string(),
            identities,
            Role::Verifier,
            None,
            true,
            &IdbindConfig::default(),
        )
        .await;
        assert!(result.is_ok());
    }
}
