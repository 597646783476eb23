//! `continuum tools`: Preview tool selection for a query.

use continuum_agent::TokenEstimator;
use continuum_config::EngineConfig;
use continuum_core::tool::ToolCatalog;
use continuum_tools::{ToolRelevanceFilter, builtin_catalog, compact_all};

pub fn run(query: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = EngineConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let catalog = builtin_catalog();
    let filter = ToolRelevanceFilter::validated(&catalog, config.tools.strict_essentials)?;
    let estimator = TokenEstimator::new();
    let model = config.model.as_str();

    let schemas = catalog.list_schemas();
    let selection = filter.select(query, &schemas);
    let selected = selection.definitions();
    let all: Vec<_> = schemas.iter().map(|t| t.to_definition()).collect();

    println!("  Query:     {query}");
    if selection.fail_open {
        println!("  Tags:      (none matched, exposing full catalog)");
    } else {
        let tags: Vec<String> = selection
            .matched_tags
            .iter()
            .map(|t| format!("{t:?}"))
            .collect();
        println!("  Tags:      {}", tags.join(", "));
    }
    println!("  Selected:  {} of {} tools", selected.len(), all.len());
    println!();
    for name in selection.names() {
        println!("    {name}");
    }
    println!();
    println!("  Tokens ({model}):");
    println!("    full catalog   {:>6}", estimator.estimate_tools(model, &all));
    println!("    selected       {:>6}", estimator.estimate_tools(model, &selected));
    println!(
        "    compacted      {:>6}",
        estimator.estimate_tools(model, &compact_all(&selected))
    );

    Ok(())
}
