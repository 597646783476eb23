//! `continuum check`: Validate configuration and the tool catalog.

use continuum_config::EngineConfig;
use continuum_tools::{ToolRelevanceFilter, builtin_catalog};

pub fn run() -> Result<(), Box<dyn std::error::Error>> {
    println!("  Continuum Check");
    println!("  ===============\n");

    let mut issues = 0;

    let config_path = EngineConfig::config_dir().join("config.toml");
    let config = match EngineConfig::load() {
        Ok(config) => {
            if config_path.exists() {
                println!("  ok    config file valid ({})", config_path.display());
            } else {
                println!("  ok    no config file, using defaults");
            }
            config
        }
        Err(e) => {
            println!("  FAIL  config invalid: {e}");
            return Err(e.into());
        }
    };

    if config.has_api_key() {
        println!("  ok    API key configured");
    } else {
        println!("  WARN  no API key (set CONTINUUM_API_KEY or ANTHROPIC_API_KEY)");
        issues += 1;
    }

    let router = continuum_providers::build_from_config(&config);
    if router.default_provider().is_some() {
        println!("  ok    default provider '{}' available", config.default_provider);
    } else {
        println!(
            "  FAIL  default provider '{}' is not supported",
            config.default_provider
        );
        issues += 1;
    }

    let catalog = builtin_catalog();
    let report = ToolRelevanceFilter::new().check_catalog(&catalog);
    if report.is_clean() {
        println!("  ok    tool catalog covers the capability table");
    } else {
        if !report.missing_essential.is_empty() {
            println!(
                "  WARN  essential tools missing: {}",
                report.missing_essential.join(", ")
            );
        }
        if !report.missing_table.is_empty() {
            println!(
                "  WARN  table tools missing: {}",
                report.missing_table.join(", ")
            );
        }
        issues += 1;
    }
    ToolRelevanceFilter::validated(&catalog, config.tools.strict_essentials)?;

    println!();
    println!("  Model:        {}", config.model);
    println!(
        "  Fallback:     {}",
        config.fallback_model.as_deref().unwrap_or("(same model)")
    );
    println!(
        "  Continuation: {} auto-continues, {} tool rounds",
        config.continuation.max_auto_continues, config.continuation.max_tool_calls
    );
    println!(
        "  Caching:      {}",
        if config.caching.enabled { "enabled" } else { "disabled" }
    );

    println!();
    if issues == 0 {
        println!("  All checks passed.");
    } else {
        println!("  {issues} issue(s) found. See above for details.");
    }

    Ok(())
}
