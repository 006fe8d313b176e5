//! Identity provider registry
//!
//! Providers are data, not code: routing a token to its provider is a table
//! lookup on the discovery URL, so adding a provider never touches the
//! verification algorithm.

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Path appended to an issuer to form its discovery URL (OIDC Discovery 1.0 §4)
pub const DISCOVERY_SUFFIX: &str = "/.well-known/openid-configuration";

/// A configured OpenID Connect identity provider
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Provider {
    /// Stable display identifier (shown to users, used for selection)
    pub display_id: String,
    /// Discovery document URL; must equal `issuer + DISCOVERY_SUFFIX`
    pub discovery_url: String,
    /// OAuth client id registered with the provider (the expected `aud`)
    pub client_id: String,
    /// Redirect URI registered for the authorization-code flow
    pub redirect_uri: String,
}

impl Provider {
    /// Whether `issuer` is this provider's issuer under the discovery suffix rule
    pub fn matches_issuer(&self, issuer: &str) -> bool {
        self.discovery_url
            .strip_suffix(DISCOVERY_SUFFIX)
            .is_some_and(|prefix| prefix == issuer)
    }
}

/// Immutable, small provider table; linear scans throughout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderRegistry {
    providers: Vec<Provider>,
}

impl ProviderRegistry {
    pub fn new(providers: Vec<Provider>) -> Self {
        Self { providers }
    }

    /// Built-in table
    pub fn builtin() -> Self {
        Self::new(vec![Provider {
            display_id: "Microsoft".to_string(),
            discovery_url: "https://login.microsoftonline.com/9188040d-6c67-4c5b-b112-36a304b66dad/v2.0/.well-known/openid-configuration".to_string(),
            client_id: "ec8813c8-670b-4b23-a85b-d44c8b7e8521".to_string(),
            redirect_uri: "msauth://org.thoughtcrime.securesms/mzt6kLeOL6MrO29SHvHxFO725UY%3D".to_string(),
        }])
    }

    pub fn by_display_id(&self, display_id: &str) -> Option<&Provider> {
        self.providers.iter().find(|p| p.display_id == display_id)
    }

    pub fn by_issuer(&self, issuer: &str) -> Option<&Provider> {
        self.providers.iter().find(|p| p.matches_issuer(issuer))
    }

    /// Resolve a user selection in order, skipping unknown display ids
    pub fn select(&self, display_ids: &[String]) -> Vec<Provider> {
        display_ids
            .iter()
            .filter_map(|id| {
                let provider = self.by_display_id(id);
                if provider.is_none() {
                    warn!(provider = %id, "ignoring unknown provider selection");
                }
                provider.cloned()
            })
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Provider> {
        self.providers.iter()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
