use idbind::fingerprint::FINGERPRINT_VERSION;
use idbind::nonce::STRETCH_ROUNDS;

/// Display version information
pub fn execute() {
    println!("idbind {}", env!("CARGO_PKG_VERSION"));
    println!("Safety-number binding for OpenID Connect ID tokens");
    println!(
        "fingerprint v{}, stretch SHA-512 x {}",
        FINGERPRINT_VERSION, STRETCH_ROUNDS
    );
}
