use clap::{Args, Parser, Subcommand};
use idbind::identity::{PartyIdentity, Role};
use std::path::PathBuf;

pub mod config;
pub mod init_config;
pub mod logging;
pub mod nonce;
pub mod providers;
pub mod stretch;
pub mod verify;
pub mod version;

use config::{default_config_path, IdbindConfig};

#[derive(Parser)]
#[command(name = "idbind")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Bind safety-number fingerprints to OpenID Connect ID tokens", long_about = None)]
pub struct Cli {
    /// Path to config file (default: <config dir>/idbind/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Identity material for both parties, keys hex-encoded
#[derive(Args, Debug, Clone)]
pub struct IdentityArgs {
    /// Local stable identifier
    #[arg(long)]
    pub self_id: String,

    /// Local identity public key (hex)
    #[arg(long)]
    pub self_key: String,

    /// Peer stable identifier
    #[arg(long)]
    pub peer_id: String,

    /// Peer identity public key (hex)
    #[arg(long)]
    pub peer_key: String,
}

impl IdentityArgs {
    pub fn identities(&self) -> Result<(PartyIdentity, PartyIdentity), Box<dyn std::error::Error>> {
        let local = PartyIdentity::new(self.self_id.as_bytes(), decode_hex("self-key", &self.self_key)?);
        let peer = PartyIdentity::new(self.peer_id.as_bytes(), decode_hex("peer-key", &self.peer_key)?);
        Ok((local, peer))
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Verify a received token bundle against the local fingerprint
    Verify {
        /// Bundle string, or @path to read it from a file
        bundle: String,

        #[command(flatten)]
        identities: IdentityArgs,

        /// Which side produced the bundle: verifier (received) or producer (sent)
        #[arg(long, default_value = "verifier")]
        role: Role,

        /// Evaluate token expiry at this unix time (e.g. the message timestamp)
        #[arg(long)]
        at: Option<u64>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Stretch a fingerprint with a salt
    Stretch {
        /// Fingerprint bytes (hex)
        #[arg(long)]
        fingerprint: String,

        /// Salt (base64, may be empty)
        #[arg(long, default_value = "")]
        salt: String,
    },

    /// Form a fresh compound nonce for a fingerprint
    Nonce {
        /// Fingerprint bytes (hex)
        #[arg(long)]
        fingerprint: String,

        /// Salt (base64); a fresh one is generated when omitted
        #[arg(long)]
        salt: Option<String>,
    },

    /// Decode a compound nonce and optionally check its binding
    ParseNonce {
        /// Compound nonce
        nonce: String,

        /// Fingerprint to check the binding against (hex)
        #[arg(long, requires = "salt")]
        fingerprint: Option<String>,

        /// Salt to check the binding against (base64)
        #[arg(long, requires = "fingerprint")]
        salt: Option<String>,
    },

    /// List configured identity providers
    Providers,

    /// Write a commented default config file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Display version information
    Version,
}

pub async fn execute(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = cli.config.unwrap_or_else(default_config_path);

    // Writing a fresh config must work even when the current one is broken.
    if let Commands::InitConfig { force } = cli.command {
        return init_config::execute(&config_path, force);
    }

    let config = IdbindConfig::load_or_default(&config_path)?;
    logging::init(&config.logging)?;

    match cli.command {
        Commands::Verify {
            bundle,
            identities,
            role,
            at,
            json,
        } => verify::execute(bundle, identities, role, at, json, &config).await,
        Commands::Stretch { fingerprint, salt } => stretch::execute(&fingerprint, &salt),
        Commands::Nonce { fingerprint, salt } => nonce::execute(&fingerprint, salt.as_deref()),
        Commands::ParseNonce {
            nonce,
            fingerprint,
            salt,
        } => nonce::execute_parse(&nonce, fingerprint.as_deref(), salt.as_deref()),
        Commands::Providers => {
            providers::execute(&config);
            Ok(())
        }
        Commands::InitConfig { .. } => Ok(()),
        Commands::Version => {
            version::execute();
            Ok(())
        }
    }
}

pub(crate) fn decode_hex(what: &str, value: &str) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    hex::decode(value.trim()).map_err(|e| format!("Invalid {} '{}': {}", what, value, e).into())
}
