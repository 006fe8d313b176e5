use super::config::IdbindConfig;
use std::path::Path;

/// Write a commented default config file to `path`
pub fn execute(path: &Path, force: bool) -> Result<(), Box<dyn std::error::Error>> {
    if path.exists() && !force {
        return Err(format!(
            "Config file '{}' already exists (use --force to overwrite)",
            path.display()
        )
        .into());
    }

    IdbindConfig::create_default(path)?;
    println!("✅ Wrote default configuration to {}", path.display());
    Ok(())
}
