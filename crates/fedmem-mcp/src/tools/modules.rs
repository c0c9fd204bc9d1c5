//! Module catalog, statistics, analysis, and maintenance tools.
//!
//! `listModules` and `getModuleStats` are the two public tools: they answer
//! without a `UserContext`. The stats tool degrades to global row counts in
//! that case — no per-user data, no content.

use serde::Deserialize;
use serde_json::{json, Value};

use fedmem_core::{AnalyzeOptions, MemoryError, Result, UserContext};

use super::parse_args;
use crate::state::AppState;

// ============================================================================
// SCHEMAS
// ============================================================================

pub fn list_schema() -> Value {
    json!({
        "type": "object",
        "properties": {}
    })
}

pub fn stats_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "moduleId": {
                "type": "string",
                "description": "Limit statistics to one module"
            }
        }
    })
}

pub fn analyze_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "moduleId": {"type": "string"},
            "topKeywords": {
                "type": "integer",
                "description": "How many keywords to report (default: 10)",
                "default": 10,
                "minimum": 1,
                "maximum": 50
            }
        },
        "required": ["moduleId"]
    })
}

pub fn classify_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "content": {"type": "string"},
            "metadata": {"type": "object"}
        },
        "required": ["content"]
    })
}

pub fn reindex_schema() -> Value {
    json!({
        "type": "object",
        "properties": {}
    })
}

// ============================================================================
// ARGUMENTS
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct StatsArgs {
    module_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct AnalyzeArgs {
    module_id: String,
    top_keywords: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ClassifyArgs {
    content: String,
    metadata: Option<Value>,
}

// ============================================================================
// HANDLERS
// ============================================================================

pub fn execute_list(state: &AppState) -> Result<Value> {
    let modules: Vec<Value> = state
        .registry
        .descriptors()
        .into_iter()
        .map(|d| {
            json!({
                "id": d.id,
                "name": d.name,
                "description": d.description,
                "type": d.module_type,
                "embeddingDimension": d.embedding_dimension,
                "metadataSchema": d.metadata_schema,
            })
        })
        .collect();
    Ok(json!({
        "total": modules.len(),
        "modules": modules,
    }))
}

pub fn execute_stats(
    state: &AppState,
    user: Option<&UserContext>,
    arguments: Option<Value>,
) -> Result<Value> {
    let args: StatsArgs = parse_args(arguments)?;
    let modules = match &args.module_id {
        Some(module_id) => vec![state.registry.get(module_id).ok_or_else(|| {
            MemoryError::InvalidArgument(format!("unknown module: {module_id}"))
        })?],
        None => state.registry.list(),
    };

    let mut stats = Vec::with_capacity(modules.len());
    for module in &modules {
        match user {
            Some(user) => {
                let s = module.get_stats(&user.user_id)?;
                stats.push(json!({
                    "moduleId": module.id(),
                    "totalMemories": s.total_memories,
                    "totalAccesses": s.total_accesses,
                    "oldest": s.oldest,
                    "newest": s.newest,
                }));
            }
            // Public shape: global counts only.
            None => stats.push(json!({
                "moduleId": module.id(),
                "totalMemories": module.count(None)?,
            })),
        }
    }
    Ok(json!({
        "scope": if user.is_some() { "user" } else { "global" },
        "modules": stats,
    }))
}

pub fn execute_analyze(
    state: &AppState,
    user: &UserContext,
    arguments: Option<Value>,
) -> Result<Value> {
    let args: AnalyzeArgs = parse_args(arguments)?;
    let module = state.registry.get(&args.module_id).ok_or_else(|| {
        MemoryError::InvalidArgument(format!("unknown module: {}", args.module_id))
    })?;
    let analysis = module.analyze(
        &user.user_id,
        AnalyzeOptions {
            top_keywords: args.top_keywords.unwrap_or(10).clamp(1, 50),
        },
    )?;
    serde_json::to_value(analysis).map_err(Into::into)
}

pub fn execute_classify(
    state: &AppState,
    _user: &UserContext,
    arguments: Option<Value>,
) -> Result<Value> {
    let args: ClassifyArgs = parse_args(arguments)?;
    let metadata = args.metadata.unwrap_or(Value::Null);
    let module_id = state.router.classify(&args.content, &metadata);
    Ok(json!({ "moduleId": module_id }))
}

pub fn execute_reindex(state: &AppState, _user: &UserContext) -> Result<Value> {
    let report = state.router.reindex()?;
    serde_json::to_value(report).map_err(Into::into)
}
