//! Memory CRUD tools.
//!
//! Thin adapters over the federated router: store, search, get, update,
//! delete. All of them take the caller's `UserContext` by parameter and
//! thread the session's cancellation token into the engine.

use serde::Deserialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use fedmem_core::{Result, SearchRequest, UpdateRequest, UserContext};

use super::parse_args;
use crate::state::AppState;

// ============================================================================
// SCHEMAS
// ============================================================================

pub fn store_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "content": {
                "type": "string",
                "description": "The memory content to store"
            },
            "metadata": {
                "type": "object",
                "description": "Freeform metadata. Recognized keys steer classification: type, category, tags, categories, importanceScore."
            },
            "moduleId": {
                "type": "string",
                "description": "Target module id. Omit to classify automatically."
            }
        },
        "required": ["content"]
    })
}

pub fn search_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "query": {
                "type": "string",
                "description": "Natural-language search query"
            },
            "limit": {
                "type": "integer",
                "description": "Maximum number of results (default: 10)",
                "default": 10,
                "minimum": 1,
                "maximum": 100
            },
            "moduleId": {
                "type": "string",
                "description": "Search only this module"
            },
            "modules": {
                "type": "array",
                "items": {"type": "string"},
                "description": "Restrict the federated search to these modules"
            }
        },
        "required": ["query"]
    })
}

pub fn get_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "memoryId": {
                "type": "string",
                "description": "Memory id; the owning module is resolved automatically"
            }
        },
        "required": ["memoryId"]
    })
}

pub fn update_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "memoryId": {"type": "string"},
            "content": {
                "type": "string",
                "description": "New content. Triggers re-embedding."
            },
            "metadata": {
                "type": "object",
                "description": "Metadata patch, shallow-merged. Null values delete keys."
            }
        },
        "required": ["memoryId"]
    })
}

pub fn delete_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "memoryId": {"type": "string"}
        },
        "required": ["memoryId"]
    })
}

// ============================================================================
// ARGUMENTS
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct StoreArgs {
    content: String,
    metadata: Option<Value>,
    module_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct SearchArgs {
    query: String,
    limit: Option<usize>,
    module_id: Option<String>,
    modules: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct GetArgs {
    memory_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct UpdateArgs {
    memory_id: String,
    content: Option<String>,
    metadata: Option<Value>,
}

// ============================================================================
// HANDLERS
// ============================================================================

pub async fn execute_store(
    state: &AppState,
    user: &UserContext,
    arguments: Option<Value>,
    token: &CancellationToken,
) -> Result<Value> {
    let args: StoreArgs = parse_args(arguments)?;
    let outcome = state
        .router
        .store(
            &user.user_id,
            &args.content,
            args.metadata,
            args.module_id.as_deref(),
            token,
        )
        .await?;
    Ok(json!({
        "memoryId": outcome.memory_id,
        "moduleId": outcome.module_id,
    }))
}

pub async fn execute_search(
    state: &AppState,
    user: &UserContext,
    arguments: Option<Value>,
    token: &CancellationToken,
) -> Result<Value> {
    let args: SearchArgs = parse_args(arguments)?;
    let hits = state
        .router
        .search(
            &user.user_id,
            &args.query,
            SearchRequest {
                limit: args.limit.unwrap_or(10),
                module_id: args.module_id,
                modules: args.modules,
            },
            token,
        )
        .await?;
    Ok(json!({
        "query": args.query,
        "total": hits.len(),
        "results": hits,
    }))
}

pub fn execute_get(
    state: &AppState,
    user: &UserContext,
    arguments: Option<Value>,
) -> Result<Value> {
    let args: GetArgs = parse_args(arguments)?;
    match state.router.get(&user.user_id, &args.memory_id)? {
        Some((module_id, record)) => Ok(json!({
            "moduleId": module_id,
            "memory": record,
        })),
        None => Err(fedmem_core::MemoryError::NotFound(format!(
            "memory {}",
            args.memory_id
        ))),
    }
}

pub async fn execute_update(
    state: &AppState,
    user: &UserContext,
    arguments: Option<Value>,
    token: &CancellationToken,
) -> Result<Value> {
    let args: UpdateArgs = parse_args(arguments)?;
    let (module_id, record) = state
        .router
        .update(
            &user.user_id,
            &args.memory_id,
            UpdateRequest {
                content: args.content,
                metadata: args.metadata,
            },
            token,
        )
        .await?;
    Ok(json!({
        "moduleId": module_id,
        "memory": record,
    }))
}

pub fn execute_delete(
    state: &AppState,
    user: &UserContext,
    arguments: Option<Value>,
) -> Result<Value> {
    let args: GetArgs = parse_args(arguments)?;
    let existed = state.router.delete(&user.user_id, &args.memory_id)?;
    Ok(json!({
        "memoryId": args.memory_id,
        "deleted": existed,
    }))
}
