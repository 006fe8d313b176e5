use super::decode_hex;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use idbind::fingerprint::Fingerprint;
use idbind::nonce::{parse_nonce, NonceBinder, Salt};

/// Form a fresh compound nonce, generating a salt when none is given
pub fn execute(fingerprint: &str, salt: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    let fingerprint = Fingerprint::from_bytes(decode_hex("fingerprint", fingerprint)?);
    let salt = match salt {
        Some(encoded) => Salt::from_base64(encoded.trim())?,
        None => Salt::generate(),
    };

    let nonce = NonceBinder::new().fresh_nonce(&fingerprint, &salt);
    println!("salt:  {}", salt.to_base64());
    println!("nonce: {}", nonce);
    Ok(())
}

/// Decode a compound nonce; with a fingerprint and salt, also check the binding
pub fn execute_parse(
    nonce: &str,
    fingerprint: Option<&str>,
    salt: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let (true_nonce, hash) = parse_nonce(nonce.trim())?;
    println!("true nonce:       {}", STANDARD.encode(true_nonce.as_bytes()));
    println!("fingerprint hash: {}", hash.to_hex());

    if let (Some(fingerprint), Some(salt)) = (fingerprint, salt) {
        let fingerprint = Fingerprint::from_bytes(decode_hex("fingerprint", fingerprint)?);
        let salt = Salt::from_base64(salt.trim())?;

        match NonceBinder::new().check_binding(Some(nonce.trim()), &fingerprint, &salt) {
            Ok(()) => println!("✅ Bound to the given fingerprint and salt"),
            Err(e) => return Err(format!("❌ {}", e).into()),
        }
    }
    Ok(())
}
