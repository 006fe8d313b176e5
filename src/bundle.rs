//! Token bundle wire format
//!
//! ```text
//! bundle   = salt-b64 "?" token *( ";" token )
//! salt-b64 = base64(32 random bytes)
//! token    = <compact signed JWT>
//! ```
//!
//! Base64 is the standard alphabet with padding; neither it nor compact JWTs
//! can contain `?` or `;`.

use crate::nonce::Salt;
use thiserror::Error;

/// Separator between the salt and the token list
pub const SALT_SEPARATOR: char = '?';

/// Separator between tokens
pub const TOKEN_SEPARATOR: char = ';';

/// Bundle parsing errors (the "configuration" failure of a verification pass)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BundleError {
    #[error("Bundle has no salt separator")]
    MissingSeparator,

    #[error("Bundle has more than one salt separator")]
    ExtraSeparator,

    #[error("Bundle salt is not valid base64: {0}")]
    InvalidSalt(String),
}

/// Salt plus the raw ID tokens bound to it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenBundle {
    pub salt: Salt,
    pub tokens: Vec<String>,
}

impl TokenBundle {
    pub fn new(salt: Salt, tokens: Vec<String>) -> Self {
        Self { salt, tokens }
    }

    /// Parse a received bundle string
    ///
    /// An empty salt segment is valid and decodes to an empty salt. Empty
    /// token segments are discarded, so `"salt?"` is a zero-token bundle.
    pub fn parse(wire: &str) -> Result<Self, BundleError> {
        let (salt_part, token_part) = wire
            .split_once(SALT_SEPARATOR)
            .ok_or(BundleError::MissingSeparator)?;

        if token_part.contains(SALT_SEPARATOR) {
            return Err(BundleError::ExtraSeparator);
        }

        let salt = Salt::from_base64(salt_part.trim())
            .map_err(|e| BundleError::InvalidSalt(e.to_string()))?;

        let tokens = token_part
            .split(TOKEN_SEPARATOR)
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from)
            .collect();

        Ok(Self { salt, tokens })
    }

    /// Encode for transmission
    pub fn to_wire(&self) -> String {
        format!(
            "{}{}{}",
            self.salt.to_base64(),
            SALT_SEPARATOR,
            self.tokens.join(&TOKEN_SEPARATOR.to_string())
        )
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}
