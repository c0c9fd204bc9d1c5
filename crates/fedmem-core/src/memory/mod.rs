//! Memory data model.
//!
//! A memory is one content record with a full-resolution embedding and
//! freeform metadata, owned by exactly one module. The Central Memory Index
//! keeps a compressed summary of every memory across all modules.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// TIMESTAMPS
// ============================================================================

/// Format a timestamp for storage. Microsecond precision with a fixed-width
/// offset, so stored strings compare lexicographically in timestamp order.
pub fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored timestamp.
pub fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

// ============================================================================
// RECORDS
// ============================================================================

/// One row in a module's memory table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryRecord {
    /// Unique identifier (UUID v4). Unique within the owning module.
    pub id: String,
    /// Owning user. Every operation scopes by this.
    pub user_id: String,
    /// The memory content (unbounded UTF-8).
    pub content: String,
    /// Full-resolution embedding, dimension fixed by the owning module.
    #[serde(skip_serializing)]
    pub embedding: Vec<f32>,
    /// Schemaless metadata. Always a JSON object.
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_accessed: Option<DateTime<Utc>>,
    pub access_count: i64,
}

/// A search result carried upward through the router and tool surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryHit {
    pub id: String,
    pub module_id: String,
    pub content: String,
    pub metadata: Value,
    /// Cosine similarity to the query, clamped to `[0, 1]`.
    pub similarity: f32,
    pub updated_at: DateTime<Utc>,
}

/// One entry in the Central Memory Index. Derived state: a rebuild from the
/// module tables must reproduce it modulo timestamps.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CmiEntry {
    pub user_id: String,
    pub module_id: String,
    pub remote_memory_id: String,
    pub title: String,
    pub summary: String,
    pub keywords: Vec<String>,
    pub categories: Vec<String>,
    pub importance_score: f32,
    /// Compressed embedding (index dimension, default 512).
    #[serde(skip_serializing)]
    pub embedding: Vec<f32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A typed link between two memories, possibly across modules.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationshipRecord {
    pub id: String,
    pub user_id: String,
    pub source_module: String,
    pub source_memory_id: String,
    pub target_module: String,
    pub target_memory_id: String,
    pub relationship_type: String,
    /// Link strength in `[0, 1]`.
    pub strength: f32,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// MODULE DESCRIPTOR
// ============================================================================

/// Routing hints consulted by the write classifier, in rule order:
/// exact metadata fields first, tag tokens next, content regexes last.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifyHints {
    /// Exact matches against `metadata.type`.
    pub types: Vec<String>,
    /// Exact matches against `metadata.category`.
    pub categories: Vec<String>,
    /// Token matches against `metadata.tags`.
    pub tags: Vec<String>,
    /// Regex sources matched against the content.
    pub content_patterns: Vec<String>,
}

/// Static description of a module, registered once at process start.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleDescriptor {
    pub id: String,
    pub name: String,
    pub description: String,
    pub module_type: String,
    pub embedding_dimension: usize,
    pub table_name: String,
    /// Documented shape of this module's metadata view. Advisory.
    pub metadata_schema: Value,
    pub classify_hints: ClassifyHints,
    /// Metadata keys whose value distribution `analyze` reports.
    pub analyze_facets: Vec<String>,
}

// ============================================================================
// INDEX FIELD DERIVATION
// ============================================================================

/// Summary fields derived from a memory at store/update time and written
/// through to the Central Memory Index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexFields {
    pub title: String,
    pub summary: String,
    pub keywords: Vec<String>,
    pub categories: Vec<String>,
    pub importance_score: f32,
}

/// Tokens too common to be useful index keywords.
const STOPWORDS: &[&str] = &[
    "about", "after", "again", "been", "before", "being", "between", "both",
    "could", "does", "doing", "down", "during", "each", "from", "further",
    "have", "having", "here", "into", "just", "more", "most", "once", "only",
    "other", "over", "same", "should", "some", "such", "than", "that", "their",
    "them", "then", "there", "these", "they", "this", "those", "through",
    "today", "under", "until", "very", "were", "what", "when", "where",
    "which", "while", "will", "with", "would", "your",
];

impl IndexFields {
    /// Derive index fields from content and caller metadata.
    ///
    /// Title is the first 100 chars of line one; summary the first 200 chars
    /// of the content; keywords at most 10 lowercased non-stopword tokens of
    /// length > 3, deduplicated, order preserved. Categories default to the
    /// owning module id, importance to 0.5.
    pub fn derive(content: &str, metadata: &Value, module_id: &str) -> Self {
        let first_line = content.lines().next().unwrap_or("");
        let title: String = first_line.chars().take(100).collect();
        let summary: String = content.chars().take(200).collect();

        let categories = metadata
            .get("categories")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| vec![module_id.to_string()]);

        let importance_score = metadata
            .get("importanceScore")
            .or_else(|| metadata.get("importance"))
            .and_then(Value::as_f64)
            .map(|v| v.clamp(0.0, 1.0) as f32)
            .unwrap_or(0.5);

        Self {
            title,
            summary,
            keywords: extract_keywords(content, 10),
            categories,
            importance_score,
        }
    }
}

/// Lowercased non-stopword tokens of length > 3, deduped, order-preserving.
pub fn extract_keywords(content: &str, max: usize) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut keywords = Vec::new();
    for token in content
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 3)
    {
        let lower = token.to_lowercase();
        if STOPWORDS.contains(&lower.as_str()) {
            continue;
        }
        if seen.insert(lower.clone()) {
            keywords.push(lower);
            if keywords.len() >= max {
                break;
            }
        }
    }
    keywords
}

/// Normalize caller metadata into a JSON object, rejecting non-objects.
pub fn normalize_metadata(metadata: Option<Value>) -> crate::error::Result<Value> {
    match metadata {
        None | Some(Value::Null) => Ok(Value::Object(Default::default())),
        Some(v @ Value::Object(_)) => Ok(v),
        Some(other) => Err(crate::error::MemoryError::InvalidArgument(format!(
            "metadata must be a JSON object, got {}",
            json_type_name(&other)
        ))),
    }
}

fn json_type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Shallow-merge a metadata patch into an existing object. `null` values in
/// the patch delete the key.
pub fn merge_metadata(current: &Value, patch: &Value) -> Value {
    let mut merged = current
        .as_object()
        .cloned()
        .unwrap_or_default();
    if let Some(patch) = patch.as_object() {
        for (k, v) in patch {
            if v.is_null() {
                merged.remove(k);
            } else {
                merged.insert(k.clone(), v.clone());
            }
        }
    }
    Value::Object(merged)
}

// ============================================================================
// TESTS
// ============================================================================
