use super::config::IdbindConfig;
use idbind::provider::{ProviderRegistry, DISCOVERY_SUFFIX};

/// List the identity providers in effect
pub fn execute(config: &IdbindConfig) {
    let source = if config.providers.is_empty() {
        "built-in"
    } else {
        "configured"
    };
    let registry = config.registry();

    println!("{} {} provider(s):", registry.len(), source);
    for line in describe(&registry) {
        println!("{}", line);
    }
}

fn describe(registry: &ProviderRegistry) -> Vec<String> {
    registry
        .iter()
        .map(|provider| {
            let issuer = provider
                .discovery_url
                .strip_suffix(DISCOVERY_SUFFIX)
                .unwrap_or("<discovery URL lacks the standard suffix>");
            format!(
                "  {}\n    issuer:    {}\n    client id: {}\n    redirect:  {}",
                provider.display_id, issuer, provider.client_id, provider.redirect_uri
            )
        })
        .collect()
}
