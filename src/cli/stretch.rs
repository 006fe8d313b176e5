use super::decode_hex;
use idbind::nonce::{stretch, Salt};

/// Print `stretch(fingerprint, salt)` as hex
pub fn execute(fingerprint: &str, salt: &str) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", stretched_hex(fingerprint, salt)?);
    Ok(())
}

fn stretched_hex(fingerprint: &str, salt: &str) -> Result<String, Box<dyn std::error::Error>> {
    let fingerprint = decode_hex("fingerprint", fingerprint)?;
    let salt = Salt::from_base64(salt.trim())?;
    Ok(stretch(&fingerprint, salt.as_bytes()).to_hex())
}
