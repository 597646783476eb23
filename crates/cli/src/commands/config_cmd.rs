//! `continuum config`: Configuration file management.

use continuum_config::EngineConfig;

pub fn show() -> Result<(), Box<dyn std::error::Error>> {
    let mut config = EngineConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    redact(&mut config);
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

pub fn path() {
    println!("{}", EngineConfig::config_dir().join("config.toml").display());
}

pub fn init() -> Result<(), Box<dyn std::error::Error>> {
    let config_dir = EngineConfig::config_dir();
    let config_path = config_dir.join("config.toml");

    if config_path.exists() {
        println!("  Config already exists at: {}", config_path.display());
        return Ok(());
    }

    std::fs::create_dir_all(&config_dir)?;
    std::fs::write(&config_path, EngineConfig::default_toml())?;
    println!("  Created config.toml at: {}", config_path.display());
    println!("  Add your API key there, or set ANTHROPIC_API_KEY.");
    Ok(())
}

/// Blank out secrets before printing.
fn redact(config: &mut EngineConfig) {
    if config.api_key.is_some() {
        config.api_key = Some("***".into());
    }
    for provider in config.providers.values_mut() {
        if provider.api_key.is_some() {
            provider.api_key = Some("***".into());
        }
    }
}
