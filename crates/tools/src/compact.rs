//! Schema compaction for extreme context pressure.
//!
//! Descriptions shrink to their first sentence (at most
//! [`MAX_DESCRIPTION_CHARS`] characters) and parameter schemas keep only
//! the structural keywords a model needs to produce valid arguments.

use continuum_core::provider::ToolDefinition;
use serde_json::{Map, Value};

/// Upper bound on a compacted description, in characters.
pub const MAX_DESCRIPTION_CHARS: usize = 60;

/// Schema keys that survive compaction.
const KEPT_KEYS: [&str; 7] = ["type", "properties", "required", "items", "enum", "anyOf", "oneOf"];

/// Compact one tool definition.
pub fn compact_definition(def: &ToolDefinition) -> ToolDefinition {
    ToolDefinition {
        name: def.name.clone(),
        description: compact_description(&def.description),
        parameters: compact_schema(&def.parameters),
    }
}

/// Compact every definition, keeping order.
pub fn compact_all(defs: &[ToolDefinition]) -> Vec<ToolDefinition> {
    defs.iter().map(compact_definition).collect()
}

/// First sentence, capped at [`MAX_DESCRIPTION_CHARS`] characters.
pub fn compact_description(description: &str) -> String {
    let trimmed = description.trim();
    let sentence = match trimmed.find(". ") {
        Some(end) => &trimmed[..=end],
        None => trimmed,
    };
    sentence.chars().take(MAX_DESCRIPTION_CHARS).collect()
}

/// Strip documentation keywords from a JSON schema, recursively.
pub fn compact_schema(schema: &Value) -> Value {
    match schema {
        Value::Object(obj) => {
            let mut out = Map::new();
            for key in KEPT_KEYS {
                let Some(value) = obj.get(key) else { continue };
                let compacted = match key {
                    "properties" => match value {
                        Value::Object(props) => Value::Object(
                            props
                                .iter()
                                .map(|(name, prop)| (name.clone(), compact_schema(prop)))
                                .collect(),
                        ),
                        other => other.clone(),
                    },
                    "items" => compact_schema(value),
                    "anyOf" | "oneOf" => match value {
                        Value::Array(variants) => {
                            Value::Array(variants.iter().map(compact_schema).collect())
                        }
                        other => other.clone(),
                    },
                    _ => value.clone(),
                };
                out.insert(key.to_string(), compacted);
            }
            Value::Object(out)
        }
        other => other.clone(),
    }
}
