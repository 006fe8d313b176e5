//! idbind configuration file handling
//!
//! TOML, by default at `<config dir>/idbind/config.toml`. Every section is
//! optional; without `[[providers]]` the built-in provider table is used.

use idbind::metadata::DEFAULT_TIMEOUT;
use idbind::provider::{Provider, ProviderRegistry};
use idbind::verify::{VerifierConfig, ExpiryPolicy, DEFAULT_LEEWAY};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default log level
const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdbindConfig {
    pub logging: LoggingConfig,
    pub metadata: MetadataConfig,
    pub verification: VerificationConfig,
    pub providers: Vec<Provider>,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or `EnvFilter` directive; `RUST_LOG` takes precedence
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
            file: None,
        }
    }
}

/// Provider metadata fetching
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataConfig {
    #[serde(with = "humantime_duration")]
    pub timeout: Duration,

    /// Refuse plain-http discovery and JWKS URLs
    pub require_https: bool,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            require_https: true,
        }
    }
}

/// Token verification policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationConfig {
    /// Enforce `exp` at the time of verification
    pub check_expiry: bool,

    #[serde(with = "humantime_duration")]
    pub leeway: Duration,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            check_expiry: false,
            leeway: DEFAULT_LEEWAY,
        }
    }
}

impl VerificationConfig {
    /// Verifier settings with expiry evaluated at `now` when enabled
    pub fn verifier_config(&self, now: u64) -> VerifierConfig {
        VerifierConfig {
            expiry: if self.check_expiry {
                ExpiryPolicy::At(now)
            } else {
                ExpiryPolicy::Ignore
            },
            leeway: self.leeway,
        }
    }
}

impl IdbindConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file '{}': {}", path.display(), e))?;

        let config: IdbindConfig = toml::from_str(&contents)
            .map_err(|e| format!("Failed to parse config file '{}': {}", path.display(), e))?;

        Ok(config)
    }

    /// Load `path` if it exists, otherwise defaults
    pub fn load_or_default(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Configured providers, or the built-in table when none are configured
    pub fn registry(&self) -> ProviderRegistry {
        if self.providers.is_empty() {
            ProviderRegistry::builtin()
        } else {
            ProviderRegistry::new(self.providers.clone())
        }
    }

    /// Generate default configuration content as a string with comments
    pub fn generate_default_toml() -> String {
        format!(
            r#"# idbind configuration

[logging]
# Log level or filter directive (trace, debug, info, warn, error).
# RUST_LOG overrides this when set.
level = "{level}"

# Log file path (optional, logs to stderr if not specified)
# file = "/var/log/idbind/idbind.log"

[metadata]
# Per-request timeout for discovery documents and signing keys
timeout = "{timeout}"

# Refuse non-https provider URLs
require_https = true

[verification]
# Enforce token expiry at verification time. Tokens embedded in messages
# are historical proofs, so this is off by default.
check_expiry = false

# Clock skew tolerated when expiry is enforced
leeway = "{leeway}"

# Identity providers. Without any [[providers]] entries the built-in
# table is used. The discovery URL must be the issuer followed by
# /.well-known/openid-configuration, exactly.
#
# [[providers]]
# display_id = "Example"
# discovery_url = "https://id.example.com/.well-known/openid-configuration"
# client_id = "your-client-id"
# redirect_uri = "app.example:/oauth2redirect"
"#,
            level = DEFAULT_LOG_LEVEL,
            timeout = humantime::format_duration(DEFAULT_TIMEOUT),
            leeway = humantime::format_duration(DEFAULT_LEEWAY),
        )
    }

    /// Create and save a default configuration file
    pub fn create_default(config_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create config directory: {}", e))?;
        }

        fs::write(config_path, Self::generate_default_toml()).map_err(|e| {
            format!(
                "Failed to write config file '{}': {}",
                config_path.display(),
                e
            )
        })?;

        Ok(())
    }
}

/// Get the default config file path
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("idbind")
        .join("config.toml")
}

/// Durations as human-readable strings ("10s", "1m 30s")
mod humantime_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&humantime::format_duration(*duration))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(raw.trim()).map_err(serde::de::Error::custom)
    }
}
