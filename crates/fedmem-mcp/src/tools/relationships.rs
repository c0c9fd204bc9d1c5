//! Relationship tools.

use serde::Deserialize;
use serde_json::{json, Value};

use fedmem_core::{NewRelationship, Result, UserContext};

use super::parse_args;
use crate::state::AppState;

pub fn create_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "sourceModule": {"type": "string"},
            "sourceMemoryId": {"type": "string"},
            "targetModule": {"type": "string"},
            "targetMemoryId": {"type": "string"},
            "relationshipType": {
                "type": "string",
                "description": "Link kind, e.g. 'references', 'follows', 'contradicts'"
            },
            "strength": {
                "type": "number",
                "description": "Link strength (0.0-1.0, default: 0.5)",
                "default": 0.5,
                "minimum": 0.0,
                "maximum": 1.0
            },
            "metadata": {"type": "object"}
        },
        "required": ["sourceModule", "sourceMemoryId", "targetModule", "targetMemoryId", "relationshipType"]
    })
}

pub fn list_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "moduleId": {"type": "string"},
            "memoryId": {"type": "string"}
        },
        "required": ["moduleId", "memoryId"]
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct CreateArgs {
    source_module: String,
    source_memory_id: String,
    target_module: String,
    target_memory_id: String,
    relationship_type: String,
    strength: Option<f32>,
    metadata: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ListArgs {
    module_id: String,
    memory_id: String,
}

pub fn execute_create(
    state: &AppState,
    user: &UserContext,
    arguments: Option<Value>,
) -> Result<Value> {
    let args: CreateArgs = parse_args(arguments)?;
    let record = state.router.create_relationship(
        &user.user_id,
        NewRelationship {
            source_module: args.source_module,
            source_memory_id: args.source_memory_id,
            target_module: args.target_module,
            target_memory_id: args.target_memory_id,
            relationship_type: args.relationship_type,
            strength: args.strength.unwrap_or(0.5),
            metadata: args.metadata.unwrap_or(Value::Object(Default::default())),
        },
    )?;
    serde_json::to_value(record).map_err(Into::into)
}

pub fn execute_list(
    state: &AppState,
    user: &UserContext,
    arguments: Option<Value>,
) -> Result<Value> {
    let args: ListArgs = parse_args(arguments)?;
    let relationships =
        state
            .router
            .list_relationships(&user.user_id, &args.module_id, &args.memory_id)?;
    Ok(json!({
        "total": relationships.len(),
        "relationships": relationships,
    }))
}
