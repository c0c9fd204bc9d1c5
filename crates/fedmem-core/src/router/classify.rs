//! Write classifier.
//!
//! Pure, rule-based routing: given content and metadata, pick the module a
//! new memory belongs to. Rules run in phases — `metadata.type`, then
//! `metadata.category`, then tag tokens, then content regexes — and within a
//! phase modules are consulted in id order, so the first firing rule wins
//! deterministically. Nothing firing routes to the default module.
//!
//! Deliberately not learned: a total, deterministic function keeps the
//! routing layer testable.

use regex::Regex;
use serde_json::Value;

use crate::error::{MemoryError, Result};
use crate::memory::ModuleDescriptor;

/// Module that receives unclassifiable writes.
pub const DEFAULT_MODULE: &str = "personal";

struct CompiledRules {
    module_id: String,
    types: Vec<String>,
    categories: Vec<String>,
    tags: Vec<String>,
    content_patterns: Vec<Regex>,
}

/// Compiled classifier over a fixed module set.
pub struct Classifier {
    /// In module-id order; the registry enumeration is already sorted.
    rules: Vec<CompiledRules>,
    default_module: String,
}

impl Classifier {
    /// Compile classify hints. Descriptors must arrive sorted by id.
    pub fn new(descriptors: &[ModuleDescriptor]) -> Result<Self> {
        let mut rules = Vec::with_capacity(descriptors.len());
        for descriptor in descriptors {
            let mut content_patterns = Vec::new();
            for source in &descriptor.classify_hints.content_patterns {
                let regex = Regex::new(source).map_err(|e| {
                    MemoryError::InvalidArgument(format!(
                        "module {} content pattern {source:?}: {e}",
                        descriptor.id
                    ))
                })?;
                content_patterns.push(regex);
            }
            rules.push(CompiledRules {
                module_id: descriptor.id.clone(),
                types: lowered(&descriptor.classify_hints.types),
                categories: lowered(&descriptor.classify_hints.categories),
                tags: lowered(&descriptor.classify_hints.tags),
                content_patterns,
            });
        }
        let default_module = if rules.iter().any(|r| r.module_id == DEFAULT_MODULE) {
            DEFAULT_MODULE.to_string()
        } else {
            rules
                .first()
                .map(|r| r.module_id.clone())
                .unwrap_or_else(|| DEFAULT_MODULE.to_string())
        };
        Ok(Self {
            rules,
            default_module,
        })
    }

    /// Pure classification. Same inputs always yield the same module id.
    pub fn classify(&self, content: &str, metadata: &Value) -> &str {
        // Phase 1: exact metadata.type.
        if let Some(kind) = metadata.get("type").and_then(Value::as_str) {
            let kind = kind.to_lowercase();
            for rule in &self.rules {
                if rule.types.iter().any(|t| t == &kind) {
                    return &rule.module_id;
                }
            }
        }

        // Phase 2: exact metadata.category.
        if let Some(category) = metadata.get("category").and_then(Value::as_str) {
            let category = category.to_lowercase();
            for rule in &self.rules {
                if rule.categories.iter().any(|c| c == &category) {
                    return &rule.module_id;
                }
            }
        }

        // Phase 3: tag tokens.
        if let Some(tags) = metadata.get("tags").and_then(Value::as_array) {
            let tags: Vec<String> = tags
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_lowercase)
                .collect();
            for rule in &self.rules {
                if rule.tags.iter().any(|t| tags.contains(t)) {
                    return &rule.module_id;
                }
            }
        }

        // Phase 4: content regexes.
        for rule in &self.rules {
            if rule.content_patterns.iter().any(|p| p.is_match(content)) {
                return &rule.module_id;
            }
        }

        &self.default_module
    }
}

fn lowered(items: &[String]) -> Vec<String> {
    items.iter().map(|s| s.to_lowercase()).collect()
}
